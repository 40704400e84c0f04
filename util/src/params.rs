//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::{fs::read_to_string, path::Path};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Cannot find the software root directory: {0}")]
    SwRootNotFound(std::io::Error),

    #[error("Cannot load the parmeter file {0:?}: {1}")]
    FileLoadError(std::path::PathBuf, std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
///
/// The file path is relative to the `params` directory under the software root (see
/// [`crate::host::get_sw_root`]).
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    let mut path = crate::host::get_sw_root().map_err(LoadError::SwRootNotFound)?;
    path.push("params");
    path.push(param_file_path);

    load_from(&path)
}

/// Load a parameter file from an explicit path.
pub fn load_from<P, Q>(path: Q) -> Result<P, LoadError>
where
    P: DeserializeOwned,
    Q: AsRef<Path>,
{
    let params_str = match read_to_string(path.as_ref()) {
        Ok(s) => s,
        Err(e) => return Err(LoadError::FileLoadError(path.as_ref().to_path_buf(), e)),
    };

    from_str(&params_str)
}

/// Parse parameters from a TOML string.
pub fn from_str<P>(params_str: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned,
{
    toml::from_str(params_str).map_err(LoadError::DeserialiseError)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Params {
        rate_hz: f64,
        dof: usize,
    }

    #[test]
    fn test_from_str() {
        let p: Params = from_str("rate_hz = 30.0\ndof = 7\n").unwrap();
        assert_eq!(p.rate_hz, 30.0);
        assert_eq!(p.dof, 7);

        assert!(matches!(
            from_str::<Params>("rate_hz = \"fast\""),
            Err(LoadError::DeserialiseError(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_from::<Params, _>("/nonexistent/params.toml"),
            Err(LoadError::FileLoadError(_, _))
        ));
    }
}
