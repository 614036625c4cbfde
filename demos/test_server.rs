use structopt::StructOpt;

/// Serve the echo service over TCP
#[derive(StructOpt)]
#[structopt(name = "test_server", max_term_width = 100)]
struct Args {
    /// Address to listen on
    #[structopt(long, default_value = "127.0.0.1:9000")]
    bind: String,

    /// JSON file with session options
    #[structopt(long)]
    config: Option<std::path::PathBuf>,
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::from_args();
    let config = match args.config {
        Some(path) => birpc::Config::from_json(&async_std::fs::read_to_string(path).await?)?,
        None => birpc::Config::default(),
    };
    birpc::test_server::run(args.bind.as_str(), config).await
}
