use clap::Parser;

use reserve_bridge::Bridge;
use reserve_bridge::config::Env;
use reserve_bridge::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = Env::parse();
    let ctx = env.load()?;

    telemetry::init(ctx.log_level.into())?;

    let bridge = Bridge::start(ctx).await?;
    bridge.run_until_shutdown().await
}
