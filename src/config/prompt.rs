use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use log::info;

pub const SYSTEM_TEMPLATE: &str = "system";
pub const SUMMARY_TEMPLATE: &str = "summary";

const DEFAULT_SYSTEM: &str =
    "You are a helpful assistant. Use the context below to inform your response.\n\nChat history:\n{chat_history}\n\nSummary:\n{summary}";

const DEFAULT_SUMMARY: &str =
    "Progressively summarize the lines of conversation provided, adding onto the previous summary returning a new summary.\n\nCurrent summary:\n{summary}\n\nNew lines of conversation:\n{new_lines}\n\nNew summary:";

#[derive(Debug)]
pub enum PromptError {
    TemplateNotFound(String),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::TemplateNotFound(key) => write!(f, "Prompt template '{}' not found", key),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct PromptConfig {
    #[serde(default)]
    pub templates: HashMap<String, String>,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        let templates = HashMap::from([
            (SYSTEM_TEMPLATE.to_string(), DEFAULT_SYSTEM.to_string()),
            (SUMMARY_TEMPLATE.to_string(), DEFAULT_SUMMARY.to_string()),
        ]);
        Self { templates, last_loaded: None }
    }
}

impl PromptConfig {
    fn template(&self, key: &str) -> Result<&str, PromptError> {
        self.templates
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| PromptError::TemplateNotFound(format!("templates:{}", key)))
    }

    fn validate(&self) -> Result<(), PromptError> {
        self.template(SYSTEM_TEMPLATE)?;
        self.template(SUMMARY_TEMPLATE)?;
        Ok(())
    }
}

/// Loads prompt overrides from a JSON file on top of the built-in templates.
pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(&path)?;
    let overrides: PromptConfig = serde_json::from_str(&file_content)?;

    let mut config = PromptConfig::default();
    config.templates.extend(overrides.templates);
    config.validate()?;
    config.last_loaded = Some(SystemTime::now());
    info!("Loaded prompt templates from {}", path.as_ref().display());
    Ok(Arc::new(config))
}

pub fn reload_prompts_if_changed<P: AsRef<Path>>(
    path: P,
    current_config: &Arc<PromptConfig>
) -> Result<Option<Arc<PromptConfig>>, PromptError> {
    let metadata = fs::metadata(&path)?;

    if let Ok(modified) = metadata.modified() {
        match current_config.last_loaded {
            Some(last_loaded) if modified <= last_loaded => {}
            Some(_) => {
                info!("Prompts file changed, reloading...");
                return Ok(Some(load_prompts(path)?));
            }
            None => {
                info!("No last_loaded timestamp, reloading prompts...");
                return Ok(Some(load_prompts(path)?));
            }
        }
    }
    Ok(None)
}

pub fn get_system_prompt(
    config: &PromptConfig,
    chat_history: &str,
    summary: &str
) -> Result<String, PromptError> {
    let template = config.template(SYSTEM_TEMPLATE)?;
    Ok(template.replace("{chat_history}", chat_history).replace("{summary}", summary))
}

pub fn get_summary_prompt(
    config: &PromptConfig,
    summary: &str,
    new_lines: &str
) -> Result<String, PromptError> {
    let template = config.template(SUMMARY_TEMPLATE)?;
    Ok(template.replace("{summary}", summary).replace("{new_lines}", new_lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{ Seek, SeekFrom, Write };
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_system_prompt_substitutes_memory() {
        let config = PromptConfig::default();
        let prompt = get_system_prompt(&config, "Human: hi\nAI: hello", "greetings").unwrap();
        assert!(prompt.starts_with("You are a helpful assistant."));
        assert!(prompt.contains("Chat history:\nHuman: hi\nAI: hello"));
        assert!(prompt.ends_with("Summary:\ngreetings"));
    }

    #[test]
    fn test_load_prompts_overrides_only_given_templates() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"templates": {{"system": "Be brief. {{summary}}"}}}}"#).unwrap();

        let config = load_prompts(file.path()).unwrap();
        assert_eq!(get_system_prompt(&config, "", "s").unwrap(), "Be brief. s");
        assert!(get_summary_prompt(&config, "", "x").unwrap().contains("New lines of conversation:\nx"));
        assert!(config.last_loaded.is_some());
    }

    #[test]
    fn test_reload_skips_unchanged_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"templates": {{}}}}"#).unwrap();
        let config = load_prompts(file.path()).unwrap();
        assert!(reload_prompts_if_changed(file.path(), &config).unwrap().is_none());

        let fresh = Arc::new(PromptConfig::default());
        assert!(reload_prompts_if_changed(file.path(), &fresh).unwrap().is_some());
    }

    #[test]
    fn test_reload_picks_up_rewritten_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"templates": {{"system": "Old. {{summary}}"}}}}"#).unwrap();
        let config = load_prompts(file.path()).unwrap();
        assert_eq!(get_system_prompt(&config, "", "s").unwrap(), "Old. s");

        file.as_file().set_len(0).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        write!(file, r#"{{"templates": {{"system": "New. {{summary}}"}}}}"#).unwrap();
        file.as_file().sync_all().unwrap();
        file.as_file().set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();

        let reloaded = reload_prompts_if_changed(file.path(), &config).unwrap().unwrap();
        assert_eq!(get_system_prompt(&reloaded, "", "s").unwrap(), "New. s");
    }

    #[test]
    fn test_missing_template_is_reported() {
        let config = PromptConfig { templates: HashMap::new(), last_loaded: None };
        let err = get_system_prompt(&config, "", "").unwrap_err();
        assert_eq!(err.to_string(), "Prompt template 'templates:system' not found");
    }
}
