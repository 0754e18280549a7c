use spark_ivp::SparkError;
use spark_ivp::ivp::{self, Outcome};

use std::io::Write;

#[tokio::main]
async fn main() -> Result<(), SparkError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let mut stdout = std::io::stdout().lock();

    match ivp::run(std::env::args_os(), ivp::connect, &mut stdout).await? {
        Outcome::Usage => {
            stdout.flush()?;
            std::process::exit(-1);
        }
        Outcome::Completed => Ok(()),
    }
}
