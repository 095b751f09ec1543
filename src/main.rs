use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match lyra_voice::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
