//! Echo server - a few handlers behind the default configuration.
//!
//! Methods:
//! - `echo(buffer)`: returns the buffer as result buffer 0
//! - `sum(s32, s32)`: returns the sum as the return value
//! - `reverse(buffer)`: reserves a large buffer, fills it, shrinks it to fit
//!
//! # Running
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo_server -- [config.json]
//! cargo run --example call -- 127.0.0.1:5543 hello
//! ```

use arenarpc::{MethodInterface, Server, ServerBuilder, ServerConfig};
use tracing_subscriber::EnvFilter;

fn echo(m: &mut MethodInterface<'_>) {
    let Ok(data) = m.get_parameter_buffer() else {
        let _ = m.finish_internal_error();
        return;
    };
    if m.finish_input_parameters().is_err() {
        return;
    }
    match m.write_result_buffer(0, data) {
        Ok(_) => {
            let _ = m.finish_good(data.len() as i32);
        }
        Err(e) => {
            tracing::warn!(error = %e, "echo output does not fit");
            let _ = m.finish_internal_error();
        }
    }
}

fn sum(m: &mut MethodInterface<'_>) {
    let (Ok(a), Ok(b)) = (m.get_parameter_s32(), m.get_parameter_s32()) else {
        let _ = m.finish_internal_error();
        return;
    };
    if m.finish_input_parameters().is_ok() {
        let _ = m.finish_good(a.wrapping_add(b));
    }
}

fn reverse(m: &mut MethodInterface<'_>) {
    let Ok(data) = m.get_parameter_buffer() else {
        let _ = m.finish_internal_error();
        return;
    };
    if m.finish_input_parameters().is_err() {
        return;
    }

    // Reserve whatever is left, then shrink to the real size.
    let room = m.result_remaining().saturating_sub(8);
    let result = m.reserve_result_buffer(0, room).and_then(|buf| {
        let out = m.result_buffer_mut(&buf)?;
        let n = data.len().min(out.len());
        for (dst, src) in out[..n].iter_mut().zip(data.iter().rev()) {
            *dst = *src;
        }
        m.resize_last_result_buffer(buf, n)
    });

    match result {
        Ok(buf) => {
            let _ = m.finish_good(buf.len() as i32);
        }
        Err(_) => {
            let _ = m.finish_internal_error();
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };

    let server: Server = ServerBuilder::from_config(config)
        .method("echo", echo)
        .method("sum", sum)
        .method("reverse", reverse)
        .on_setup(|| {
            tracing::info!("Echo handlers ready");
            true
        })
        .on_destruct(|| {
            tracing::info!("Echo handlers released");
            true
        })
        .bind()
        .await?;

    let stop = server.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.query_stop();
        }
    });

    server.serve().await?;
    Ok(())
}
