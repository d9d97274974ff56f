use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match deploy_runner::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(usage) = e.downcast_ref::<clap::Error>() {
                usage.exit();
            }
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
