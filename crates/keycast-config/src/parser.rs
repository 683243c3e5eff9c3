//! KDL configuration parser

use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::model::*;

/// Location used when no `--config` flag is given
pub const DEFAULT_CONFIG_PATH: &str = "~/.config/keycast/config.kdl";

/// Load the configuration for a run.
///
/// With `explicit == None` the default location is tried and a missing file
/// yields the built-in defaults. An explicitly requested file must exist.
pub fn load_config(explicit: Option<&Path>) -> Result<(Config, Option<PathBuf>), ConfigError> {
    match explicit {
        Some(path) => {
            let path = expand(path);
            if !path.exists() {
                return Err(ConfigError::NotFound { path });
            }
            let config = parse_config(&path)?;
            Ok((config, Some(path)))
        }
        None => {
            let path = expand(Path::new(DEFAULT_CONFIG_PATH));
            if path.exists() {
                let config = parse_config(&path)?;
                Ok((config, Some(path)))
            } else {
                tracing::debug!(
                    "No configuration at {}, using defaults",
                    path.display()
                );
                Ok((Config::default(), None))
            }
        }
    }
}

fn expand(path: &Path) -> PathBuf {
    shellexpand::tilde(&path.to_string_lossy()).into_owned().into()
}

/// Parse a configuration file from the given path
pub fn parse_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config_str(&content)
}

/// Parse configuration from a string
pub fn parse_config_str(content: &str) -> Result<Config, ConfigError> {
    let doc: kdl::KdlDocument = content.parse().map_err(|e: kdl::KdlError| {
        // kdl uses an older miette version, so the span is rebuilt from offset/len
        let offset = e.span.offset();
        let len = e.span.len();
        let span = miette::SourceSpan::from((offset, len));
        ConfigError::ParseError {
            src: content.to_string(),
            span,
            source: e,
        }
    })?;

    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "global" => {
                config.global = parse_global(node)?;
            }
            "capture" => {
                config.capture = parse_capture(node)?;
            }
            "overlay" => {
                config.overlay = parse_overlay(node)?;
            }
            name => {
                tracing::warn!("Unknown top-level node: {}", name);
            }
        }
    }

    Ok(config)
}

fn first_string(node: &kdl::KdlNode) -> Option<&str> {
    node.entries().first().and_then(|e| e.value().as_string())
}

fn first_bool(node: &kdl::KdlNode) -> Result<bool, ConfigError> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_bool())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects true or false", node.name().value()),
        })
}

fn ranged_u64(node: &kdl::KdlNode, (min, max): (u64, u64)) -> Result<u64, ConfigError> {
    let field = node.name().value();
    let value = node
        .entries()
        .first()
        .and_then(|e| e.value().as_i64())
        .ok_or_else(|| ConfigError::Invalid {
            message: format!("`{}` expects an integer", field),
        })?;

    if value < min as i64 || value > max as i64 {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }

    Ok(value as u64)
}

fn parse_global(node: &kdl::KdlNode) -> Result<GlobalConfig, ConfigError> {
    let mut global = GlobalConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "log-level" => {
                    if let Some(val) = first_string(child) {
                        global.log_level = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                "log-file" => {
                    if let Some(val) = first_string(child) {
                        global.log_file = Some(shellexpand::tilde(val).into_owned().into());
                    }
                }
                name => {
                    tracing::warn!("Unknown global config option: {}", name);
                }
            }
        }
    }

    Ok(global)
}

fn parse_capture(node: &kdl::KdlNode) -> Result<CaptureConfig, ConfigError> {
    let mut capture = CaptureConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "backend" => {
                    if let Some(val) = first_string(child) {
                        capture.backend = val
                            .parse()
                            .map_err(|e| ConfigError::Invalid { message: e })?;
                    }
                }
                "wait-timeout-ms" => {
                    capture.wait_timeout_ms =
                        ranged_u64(child, CaptureConfig::WAIT_TIMEOUT_RANGE)?;
                }
                "devices" => {
                    capture.devices = child
                        .entries()
                        .iter()
                        .filter_map(|e| e.value().as_string())
                        .map(str::to_string)
                        .collect();
                }
                name => {
                    tracing::warn!("Unknown capture config option: {}", name);
                }
            }
        }
    }

    Ok(capture)
}

fn parse_overlay(node: &kdl::KdlNode) -> Result<OverlayConfig, ConfigError> {
    let mut overlay = OverlayConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "always-on-top" => {
                    overlay.always_on_top = first_bool(child)?;
                }
                "poll-interval-ms" => {
                    overlay.poll_interval_ms =
                        ranged_u64(child, OverlayConfig::POLL_INTERVAL_RANGE)?;
                }
                name => {
                    tracing::warn!("Unknown overlay config option: {}", name);
                }
            }
        }
    }

    Ok(overlay)
}
