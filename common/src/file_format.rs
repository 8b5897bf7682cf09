use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SerdeFormatError {
    #[error("Failed to get file extension")]
    MissingFileExtension,
    #[error("Unsupported file extension for file: {0}")]
    UnsupportedFileExtension(String),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SerdeFormatResult<T> = Result<T, SerdeFormatError>;

pub fn get_file_extension(filename: &str) -> Option<&str> {
    Path::new(filename)
        .extension()
        .and_then(|os_str| os_str.to_str())
}

/// Text formats accepted for job and config files.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SerdeFormat {
    Yaml,
    Json,
}

impl SerdeFormat {
    pub fn from_file_name(file_name: &str) -> SerdeFormatResult<Self> {
        let ext = get_file_extension(file_name).ok_or(SerdeFormatError::MissingFileExtension)?;

        if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") {
            Ok(Self::Yaml)
        } else if ext.eq_ignore_ascii_case("json") {
            Ok(Self::Json)
        } else {
            Err(SerdeFormatError::UnsupportedFileExtension(
                file_name.to_string(),
            ))
        }
    }

    pub fn serialize<T: Serialize>(self, value: &T) -> SerdeFormatResult<String> {
        match self {
            Self::Yaml => Ok(serde_yml::to_string(value)?),
            Self::Json => Ok(serde_json::to_string_pretty(value)?),
        }
    }

    pub fn deserialize<T: DeserializeOwned + 'static>(self, text: &str) -> SerdeFormatResult<T> {
        match self {
            Self::Yaml => Ok(serde_yml::from_str(text)?),
            Self::Json => Ok(serde_json::from_str(text)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(SerdeFormat::from_file_name("job.yaml").unwrap(), SerdeFormat::Yaml);
        assert_eq!(SerdeFormat::from_file_name("job.YML").unwrap(), SerdeFormat::Yaml);
        assert_eq!(SerdeFormat::from_file_name("a/b/job.json").unwrap(), SerdeFormat::Json);
        assert!(matches!(
            SerdeFormat::from_file_name("job"),
            Err(SerdeFormatError::MissingFileExtension)
        ));
        assert!(matches!(
            SerdeFormat::from_file_name("job.toml"),
            Err(SerdeFormatError::UnsupportedFileExtension(_))
        ));
    }

    #[test]
    fn test_yaml_and_json_text() {
        let sample = Sample {
            name: "stack".to_string(),
            count: 3,
        };
        for format in [SerdeFormat::Yaml, SerdeFormat::Json] {
            let text = format.serialize(&sample).unwrap();
            assert!(text.contains("stack"));
            let back: Sample = format.deserialize(&text).unwrap();
            assert_eq!(back, sample);
        }
    }

    #[test]
    fn test_deserialize_reports_format_error() {
        let err = SerdeFormat::Json.deserialize::<Sample>("{ not json").unwrap_err();
        assert!(matches!(err, SerdeFormatError::Json(_)));
    }
}
