use clap::Parser;
use ied::{api, init_broker, IedApiVersion, Options};
use vbs::version::StaticVersionType;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let opt = Options::parse();
    opt.logging.init();

    tracing::info!(
        port = opt.port,
        adapters = ?opt.adapter_names,
        env = %opt.env,
        "starting interchain event distributor"
    );

    let context = init_broker(&opt).await?;
    api::serve(opt.port, context, IedApiVersion::instance()).await
}
