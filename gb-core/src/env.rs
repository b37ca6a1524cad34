//! reading settings that only live in the environment
use std::{env, str::FromStr};

use anyhow::Context;

/// Parse the environment variable `name`, using `default` when it is unset
/// or blank. The error names the variable.
pub fn parse_var_with_err<T, D>(name: &str, default: D) -> anyhow::Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: Into<anyhow::Error>,
    D: ToString,
{
    let raw = env::var(name)
        .ok()
        .filter(|val| !val.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    raw.parse::<T>()
        .map_err(Into::<anyhow::Error>::into)
        .with_context(|| format!("error parsing env var {name}"))
}
