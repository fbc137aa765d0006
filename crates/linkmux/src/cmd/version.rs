use serde::Serialize;

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct VersionInfo {
    name: &'static str,
    version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_os: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_arch: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    git_hash: Option<&'static str>,
}

pub fn run(args: VersionArgs, format: OutputFormat) -> CliResult<i32> {
    let info = VersionInfo {
        name: "linkmux",
        version: env!("CARGO_PKG_VERSION"),
        target_os: args.extended.then_some(std::env::consts::OS),
        target_arch: args.extended.then_some(std::env::consts::ARCH),
        git_hash: args.extended.then(|| option_env!("GIT_HASH").unwrap_or("unknown")),
    };

    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Pretty => {
            if !args.extended {
                println!("{} {}", info.name, info.version);
            } else {
                println!("name: {}", info.name);
                println!("version: {}", info.version);
                println!("target_os: {}", info.target_os.unwrap_or("unknown"));
                println!("target_arch: {}", info.target_arch.unwrap_or("unknown"));
                println!("git_hash: {}", info.git_hash.unwrap_or("unknown"));
            }
        }
    }

    Ok(SUCCESS)
}
