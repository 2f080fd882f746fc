use serde::Deserialize;
use std::fs::read_to_string;

pub trait Validatable {
    fn validate(&self) -> Result<(), String>;

    fn aggregate(elements: &[impl Validatable]) -> Result<(), String> {
        let options = elements
            .iter()
            .map(|elem| elem.validate())
            .filter_map(Result::err)
            .collect::<Vec<String>>();
        if options.is_empty() {
            Ok(())
        } else {
            Err(options.iter().fold(String::new(), |acc, x| acc + x + "\n"))
        }
    }
}

/// Reads YAML config files.
pub struct YamlConfig {}

impl YamlConfig {
    pub fn read(filename: &str) -> Result<String, String> {
        read_to_string(filename).map_err(|e| {
            debug!("error on file opening: {}", e);
            format!("error on file opening '{}': {}", filename, e)
        })
    }

    pub fn parse<T>(config: &str) -> Result<T, String>
    where
        T: for<'de> Deserialize<'de> + Validatable,
    {
        serde_yaml::from_str(config).map_err(|e| {
            debug!("error on yaml parsing: {}", e);
            format!("error on yaml parsing: {}", e)
        })
    }

    /// Reads, parses and validates.
    pub fn get<T>(filename: &str) -> Result<T, String>
    where
        T: for<'de> Deserialize<'de> + Validatable,
    {
        let file = Self::read(filename)?;
        let config: T = Self::parse(&file)?;
        config.validate().map_err(|e| {
            debug!("config is not valid: {}", e);
            format!("config is not valid: {}", e)
        })?;
        Ok(config)
    }
}
