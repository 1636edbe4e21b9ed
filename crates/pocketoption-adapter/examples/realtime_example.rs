/*
[INPUT]:  Session payload from the POCKET_SSID environment variable
[OUTPUT]: Live balance, payout, quote stream and a demo order
[POS]:    Examples - realtime client usage
[UPDATE]: When the client API changes
*/

use std::time::Duration;

use pocketoption_adapter::*;
use rust_decimal::Decimal;
use tokio::time::{sleep, timeout};

/// Example: realtime venue session
///
/// Export the session payload captured from the browser first:
///   POCKET_SSID='42["auth",{"session":"...","isDemo":1,"uid":...,"platform":2}]'
#[tokio::main]
async fn main() -> Result<()> {
    let Ok(ssid) = std::env::var("POCKET_SSID") else {
        println!("=== PocketOption Realtime Example ===\n");
        println!("Set POCKET_SSID to the captured auth payload to run:");
        println!("  1. Connect:   client.connect().await?");
        println!("  2. Wait:      client.wait_until_authenticated(...).await?");
        println!("  3. Subscribe: client.subscribe_symbol(\"EURUSD_otc\", 60).await?");
        println!("  4. Trade:     client.buy(\"EURUSD_otc\", amount, Direction::Call, 60).await?");
        return Ok(());
    };

    let client = PocketOptionClient::new(AuthPayload::Raw(ssid));
    client.connect().await?;
    client
        .wait_until_authenticated(Duration::from_secs(30))
        .await?;
    println!("✓ Authenticated");

    sleep(Duration::from_secs(2)).await;
    println!("Balance: {:?}", client.balance());
    println!("Payout for EURUSD_otc: {:?}", client.payout("EURUSD_otc"));

    let mut ticks = client.subscribe_symbol("EURUSD_otc", 60).await?;
    for _ in 0..5 {
        match timeout(Duration::from_secs(10), ticks.recv()).await {
            Ok(Ok(tick)) => println!("tick {} @ {}", tick.asset, tick.price),
            _ => break,
        }
    }
    println!("Server time: {:?}", client.server_datetime());

    let order = client
        .buy("EURUSD_otc", Decimal::ONE, Direction::Call, 60)
        .await?;
    println!("Order opened: {:?}", order.id);

    if let Some(id) = order.id {
        let deal = client
            .wait_order_closed(&id, Duration::from_secs(120))
            .await?;
        println!(
            "Order closed, profit {:?} ({})",
            deal.profit,
            if deal.is_win() { "win" } else { "loss" }
        );
    }

    client.close().await;
    Ok(())
}
