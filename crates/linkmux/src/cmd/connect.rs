use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use linkmux_client::Client;
use linkmux_transport::{StreamLink, StreamLinkConfig};

use crate::cmd::ConnectArgs;
use crate::exit::{link_error, CliError, CliResult, INTERNAL, SUCCESS, USAGE};

pub fn run(args: ConnectArgs) -> CliResult<i32> {
    let mut config = StreamLinkConfig::default();
    if let Some(input) = &args.silence_timeout {
        config.silence_timeout = Some(parse_duration(input)?);
    }
    if let Some(size) = args.max_frame_size {
        config.max_frame_size = size;
    }

    let link = StreamLink::connect_uds(&args.path, config)
        .map_err(|err| link_error("connect failed", err))?;
    info!(path = %args.path.display(), "connected");

    let client = Client::new(Arc::new(link))
        .map_err(|err| CliError::new(INTERNAL, format!("session setup failed: {err}")))?;

    let shutdown = client.shutdown_handle();
    ctrlc::set_handler(move || shutdown.stop()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })?;

    client
        .run()
        .map_err(|err| CliError::new(INTERNAL, format!("session failed: {err}")))?;
    Ok(SUCCESS)
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_seconds_millis_and_bare() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn duration_rejects_zero_and_garbage() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("").is_err());
    }
}
