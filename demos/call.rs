//! Call a running server: list its methods, then echo a message.
//!
//! ```text
//! cargo run --example call -- 127.0.0.1:5543 "hello there"
//! ```

use arenarpc::{Client, Parameter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:5543".to_string());
    let message = args.next().unwrap_or_else(|| "hello".to_string());

    let mut client = Client::connect(addr.as_str()).await?;

    let listing = client.list_methods().await?;
    println!("server speaks protocol {}", listing.version);
    for (name, id) in &listing.methods {
        println!("  {:>3}  {}", id, name);
    }

    let response = client
        .call_by_name("echo", &[Parameter::buffer(message.into_bytes())])
        .await?;
    println!(
        "echo -> {:?}, return value {}",
        response.state, response.return_value
    );
    if let Some(data) = response.buffer(0) {
        println!("  {}", String::from_utf8_lossy(data));
    }

    let response = client
        .call_by_name("sum", &[Parameter::S32(40), Parameter::S32(2)])
        .await?;
    println!("sum(40, 2) -> {}", response.return_value);

    Ok(())
}
