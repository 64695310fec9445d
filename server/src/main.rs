use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;

use server::directory::SessionDirectory;
use server::http;
use server::store::QuizStore;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[clap(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Directory containing quiz definition JSON files
    #[clap(short, long, default_value = "quizzes")]
    quizzes: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logger
    env_logger::init();

    // Print a message about setting RUST_LOG if not set
    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    info!("Starting quiz server on {}", addr);
    info!("Serving quizzes from {}", args.quizzes.display());

    let directory = SessionDirectory::new();
    let store = Arc::new(QuizStore::new(args.quizzes));
    http::run(addr, directory, store).await?;

    Ok(())
}
