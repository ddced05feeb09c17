// ─────────────────────────────────────────────────────────────────────────
// powermatcher-rs: simulated PowerMatcher-style distributed energy market.
//
// Wires up one auctioneer, one each of the four device agent kinds, and
// runs the simulation driver until `stop_time`.
// ─────────────────────────────────────────────────────────────────────────
mod agent;
mod auctioneer;
mod bid;
mod config;
mod environment;
mod error;
mod telemetry;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;

use agent::{BatteryAgent, ImbalanceAgent, LoadAgent, PvAgent};
use auctioneer::Auctioneer;
use config::Config;
use environment::Environment;
use telemetry::TelemetrySink;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();
    log::info!("powermatcher-rs starting…");

    let telemetry = TelemetrySink::new(&config);

    let min_price = dec!(0);
    let max_price = dec!(1000);
    let now = Utc::now();

    let mut auctioneer = Auctioneer::new("Sim", min_price, max_price);

    let (load_agent, samples) =
        LoadAgent::new("SimLoadAgent", min_price, max_price, dec!(1000), dec!(0.1));
    flush(&telemetry, samples).await;
    register(&mut auctioneer, &telemetry, load_agent, now).await;

    let (pv_agent, samples) =
        PvAgent::new("SimPVAgent", min_price, max_price, dec!(3000), dec!(0.1));
    flush(&telemetry, samples).await;
    register(&mut auctioneer, &telemetry, pv_agent, now).await;

    let (imbalance_agent, samples) = ImbalanceAgent::new(
        "SimImbalanceAgent",
        min_price,
        max_price,
        dec!(5000),
        dec!(5000),
    );
    flush(&telemetry, samples).await;
    register(&mut auctioneer, &telemetry, imbalance_agent, now).await;

    let (battery_agent, samples) = BatteryAgent::new(
        "SimBatteryAgent",
        min_price,
        max_price,
        50.0,
        dec!(4000),
        dec!(3000),
        0.5,
        auctioneer.id(),
        now,
    );
    flush(&telemetry, samples).await;
    register(&mut auctioneer, &telemetry, battery_agent, now).await;

    let mut environment = Environment::new(now, now + Duration::days(2), Duration::minutes(1));
    environment.register_auctioneer(auctioneer);

    let mut rng = rand::thread_rng();
    log::info!("running simulation until {}", now + Duration::days(2));
    environment.run(&telemetry, &mut rng).await;

    log::info!("simulation complete");
}

async fn register(
    auctioneer: &mut Auctioneer,
    telemetry: &TelemetrySink,
    agent: agent::AgentKind,
    now: chrono::DateTime<Utc>,
) {
    let id = agent.id().to_string();
    match auctioneer.register(agent, now) {
        Ok(samples) => flush(telemetry, samples).await,
        Err(e) => log::error!("failed to register agent '{id}': {e}"),
    }
}

async fn flush(telemetry: &TelemetrySink, samples: Vec<telemetry::Sample>) {
    telemetry.write_points(samples).await;
}
