use std::env;
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use pagebridge::{logging, Bridge, BridgeConfig, BridgeRuntime};
use serde_json::{json, Value as JsonValue};
use tracing::{error, info};
use url::Url;

const USAGE: &str = "usage: pagebridge <uri|path> [--eval <script>] [--timeout <seconds>]";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

struct Options {
    target: String,
    eval: Option<String>,
    timeout: Duration,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut target = None;
    let mut eval = None;
    let mut timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--eval" => eval = Some(args.next().ok_or_else(|| anyhow!("--eval needs a script"))?),
            "--timeout" => {
                let raw = args
                    .next()
                    .ok_or_else(|| anyhow!("--timeout needs a value"))?;
                let secs: u64 = raw
                    .parse()
                    .with_context(|| format!("invalid timeout `{raw}`"))?;
                timeout = Duration::from_secs(secs);
            }
            "-h" | "--help" => bail!(USAGE),
            other if other.starts_with("--") => bail!("unknown option `{other}`\n{USAGE}"),
            other => {
                if target.replace(other.to_string()).is_some() {
                    bail!("more than one target given\n{USAGE}");
                }
            }
        }
    }

    Ok(Options {
        target: target.ok_or_else(|| anyhow!(USAGE))?,
        eval,
        timeout,
    })
}

/// Plain paths become `file://` URLs; everything else is passed through.
fn to_uri(target: &str) -> Result<String> {
    if Url::parse(target).is_ok() {
        return Ok(target.to_string());
    }
    let path = Path::new(target)
        .canonicalize()
        .with_context(|| format!("no such file `{target}`"))?;
    Url::from_file_path(&path)
        .map(String::from)
        .map_err(|_| anyhow!("cannot turn `{}` into a file URL", path.display()))
}

fn bind_defaults(bridge: &Bridge) -> Result<()> {
    bridge.bind_json("echo", |_, args| Ok(JsonValue::Array(args)))?;
    bridge.bind_json("quit", |bridge, _| {
        bridge.quit();
        Ok(json!(true))
    })?;
    Ok(())
}

fn run(options: Options) -> Result<()> {
    let config = BridgeConfig::from_env().context("load configuration")?;
    let runtime = BridgeRuntime::init(config).context("initialize bridge runtime")?;
    let bridge = runtime.create_bridge(None).context("create bridge")?;
    bind_defaults(&bridge)?;

    let uri = to_uri(&options.target)?;
    bridge
        .load_uri(&uri)
        .with_context(|| format!("load {uri}"))?;
    if !bridge.wait_ready(Some(options.timeout)) {
        bail!("{uri} did not finish loading within {:?}", options.timeout);
    }
    info!(%uri, "page ready");

    match options.eval {
        Some(script) => {
            let result = bridge
                .execute_script_sync(&script)
                .context("evaluate script")?;
            println!("{}", result.as_deref().unwrap_or("undefined"));
        }
        None => {
            info!("running until the page calls {}.quit()", bridge.namespace());
            bridge.run();
        }
    }

    bridge.destroy();
    Ok(())
}

fn main() -> ExitCode {
    logging::init_tracing("info");

    let outcome = parse_args(env::args().skip(1)).and_then(run);
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> impl Iterator<Item = String> {
        values
            .iter()
            .map(|value| value.to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn parses_target_and_options() {
        let options = parse_args(args(&["page.html", "--eval", "1+1", "--timeout", "5"])).unwrap();
        assert_eq!(options.target, "page.html");
        assert_eq!(options.eval.as_deref(), Some("1+1"));
        assert_eq!(options.timeout, Duration::from_secs(5));
    }

    #[test]
    fn rejects_missing_target_and_unknown_flags() {
        assert!(parse_args(args(&[])).is_err());
        assert!(parse_args(args(&["a", "--verbose"])).is_err());
        assert!(parse_args(args(&["a", "b"])).is_err());
        assert!(parse_args(args(&["a", "--eval"])).is_err());
    }

    #[test]
    fn keeps_uris_and_converts_paths() {
        assert_eq!(to_uri("about:blank").unwrap(), "about:blank");
        let file = tempfile::NamedTempFile::new().unwrap();
        let uri = to_uri(file.path().to_str().unwrap()).unwrap();
        assert!(uri.starts_with("file://"));
        assert!(to_uri("definitely/not/here.html").is_err());
    }
}
