use std::{collections::BTreeMap, fmt::Write, path::Path, sync::LazyLock};

use anyhow::bail;
use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::Config;

/// Matches `{{ env.SOME_VAR }}` placeholders inside configuration strings.
static ENV_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("the placeholder pattern is valid")
});

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let mut raw_config: Value = toml::from_str(&content)?;

    expand_env_placeholders(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    for warning in collect_warnings(&config) {
        log::warn!("{warning}");
    }

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    if !config.llm.enabled() || !config.llm.has_providers() {
        // "{}" keeps the {{ env.* }} example out of format escaping.
        bail!(
            "{}",
            indoc! {r#"
                No LLM providers configured. Relay requires at least one provider to route requests.

                Example configuration:

                  [llm.providers.openai]
                  api_key = "{{ env.OPENAI_API_KEY }}"

                  [llm.providers.openai.models.gpt-4]
                  tier = "mid"
            "#}
        );
    }

    // The model index maps bare model names to a single provider, so a model
    // name may appear under at most one provider.
    let mut owners: BTreeMap<&str, &str> = BTreeMap::new();

    for (provider_name, provider) in &config.llm.providers {
        for model_name in provider.models.keys() {
            if let Some(previous) = owners.insert(model_name, provider_name) {
                bail!(
                    "Model '{model_name}' is configured under both '{previous}' and '{provider_name}'. \
                     Model names must be unique across providers; use rename to map \
                     distinct names onto the same upstream model."
                );
            }
        }
    }

    Ok(())
}

/// Soft configuration problems worth surfacing at startup without refusing
/// to serve.
pub(crate) fn collect_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    let known_models = config.llm.model_names();

    for (provider_name, provider) in &config.llm.providers {
        if provider.api_key.is_none() {
            warnings.push(format!(
                "Provider '{provider_name}' has no api_key configured and will be disabled at startup"
            ));
        }
    }

    for name in &config.llm.fallback_order {
        if !config.llm.providers.contains_key(name) {
            warnings.push(format!(
                "fallback_order references unknown provider '{name}'; it will never be used"
            ));
        }
    }

    for (plan, quota) in [
        ("free", &config.plans.free),
        ("premium", &config.plans.premium),
        ("enterprise", &config.plans.enterprise),
        ("admin", &config.plans.admin),
    ] {
        let Some(models) = quota.models.explicit_models() else {
            continue;
        };

        for model in models {
            if !known_models.contains(model.as_str()) {
                warnings.push(format!(
                    "Plan '{plan}' allows model '{model}' which no configured provider serves"
                ));
            }
        }
    }

    warnings
}

fn expand_env_placeholders<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => {
            let mut missing = None;

            let replaced = ENV_PLACEHOLDER.replace_all(s, |caps: &regex::Captures<'_>| {
                match std::env::var(&caps[1]) {
                    Ok(value) => value,
                    Err(_) => {
                        missing = Some(caps[1].to_string());
                        String::new()
                    }
                }
            });

            if let Some(var) = missing {
                // Build the path string for error reporting.
                let mut p = String::new();
                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }
                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Environment variable '{var}' referenced at '{p}' is not set");
            }

            if let std::borrow::Cow::Owned(expanded) = replaced {
                *s = expanded;
            }
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_placeholders(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_placeholders(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_snapshot;
    use std::io::Write as _;

    use crate::Config;

    #[test]
    fn validation_fails_without_providers() {
        let config = Config::default();
        let result = super::validate(&config);
        assert!(result.is_err());

        let error = result.unwrap_err().to_string();

        assert_snapshot!(error, @r#"
        No LLM providers configured. Relay requires at least one provider to route requests.

        Example configuration:

          [llm.providers.openai]
          api_key = "{{ env.OPENAI_API_KEY }}"

          [llm.providers.openai.models.gpt-4]
          tier = "mid"
        "#);
    }

    #[test]
    fn validation_fails_when_llm_disabled() {
        let config = indoc! {r#"
            [llm]
            enabled = false

            [llm.providers.openai]
            api_key = "test-key"

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config).unwrap();
        assert!(super::validate(&config).is_err());
    }

    #[test]
    fn validation_rejects_duplicate_model_names() {
        let config = indoc! {r#"
            [llm.providers.openai]
            api_key = "key1"

            [llm.providers.openai.models.gpt-4]

            [llm.providers.other]
            api_key = "key2"

            [llm.providers.other.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config).unwrap();
        let result = super::validate(&config);
        assert!(result.is_err());

        let error = result.unwrap_err().to_string();
        assert!(error.contains("unique across providers"));
    }

    #[test]
    fn validation_passes_with_provider() {
        let config = indoc! {r#"
            [llm.providers.openai]
            api_key = "test-key"

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config).unwrap();
        assert!(super::validate(&config).is_ok());
    }

    #[test]
    fn warnings_for_missing_key_and_unknown_fallback() {
        let config = indoc! {r#"
            [llm]
            fallback_order = ["openai", "missing"]

            [llm.providers.openai]

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config).unwrap();
        let warnings = super::collect_warnings(&config);

        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("no api_key"));
        assert!(warnings[1].contains("unknown provider 'missing'"));
    }

    #[test]
    fn warning_for_plan_model_nobody_serves() {
        let config = indoc! {r#"
            [plans.free]
            requests_per_hour = 50
            tokens_per_day = 10000
            models = ["gpt-5"]

            [llm.providers.openai]
            api_key = "key"

            [llm.providers.openai.models.gpt-4]
        "#};

        let config: Config = toml::from_str(config).unwrap();
        let warnings = super::collect_warnings(&config);

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("gpt-5"));
    }

    #[test]
    fn env_placeholder_expansion() {
        // SAFETY: tests in this module are the only writers of this variable.
        unsafe {
            std::env::set_var("RELAY_TEST_API_KEY", "sk-expanded");
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();

        let config = indoc! {r#"
            [llm.providers.openai]
            api_key = "{{ env.RELAY_TEST_API_KEY }}"

            [llm.providers.openai.models.gpt-4]
        "#};

        file.write_all(config.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.llm.providers["openai"].api_key.is_some());
    }

    #[test]
    fn missing_env_placeholder_fails_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();

        let config = indoc! {r#"
            [llm.providers.openai]
            api_key = "{{ env.RELAY_TEST_DEFINITELY_UNSET }}"

            [llm.providers.openai.models.gpt-4]
        "#};

        file.write_all(config.as_bytes()).unwrap();

        let error = Config::load(file.path()).unwrap_err().to_string();

        assert_snapshot!(error, @"Environment variable 'RELAY_TEST_DEFINITELY_UNSET' referenced at 'llm.providers.openai.api_key' is not set");
    }
}
