use cuex_core::StroopResponse;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const BEHAVIOR_LOG: &str = "data.csv";
const HEADER: [&str; 2] = ["User Inputs", "Elapsed Time"];

#[derive(Debug, Error)]
pub enum BehaviorLogError {
    #[error("cannot create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

/// Writes the Stroop responses to `dir/data.csv`, header first even when
/// no response was given.
pub fn write_behavior_log(dir: &Path, responses: &[StroopResponse]) -> Result<PathBuf, BehaviorLogError> {
    std::fs::create_dir_all(dir).map_err(|source| BehaviorLogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(BEHAVIOR_LOG);
    let mut w = csv::WriterBuilder::new().has_headers(false).from_path(&path)?;
    w.write_record(HEADER)?;
    for r in responses {
        w.serialize(r)?;
    }
    w.flush().map_err(|source| BehaviorLogError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Reads a behavioural log back, mostly for checks after a session.
pub fn read_behavior_log(path: &Path) -> Result<Vec<StroopResponse>, BehaviorLogError> {
    let mut r = csv::Reader::from_path(path)?;
    r.deserialize().map(|row| row.map_err(BehaviorLogError::from)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuex_core::Answer;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cuex-behavior-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn writes_header_and_rows() {
        let dir = scratch("rows");
        let rows = vec![
            StroopResponse { answer: Answer::Yes, elapsed_s: 71.25 },
            StroopResponse { answer: Answer::No, elapsed_s: 80.5 },
        ];
        let path = write_behavior_log(&dir, &rows).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("User Inputs,Elapsed Time"));
        assert_eq!(lines.next(), Some("Yes,71.25"));
        assert_eq!(lines.next(), Some("No,80.5"));
        assert_eq!(read_behavior_log(&path).unwrap(), rows);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn empty_log_still_has_header() {
        let dir = scratch("empty");
        let path = write_behavior_log(&dir, &[]).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim_end(), "User Inputs,Elapsed Time");
        std::fs::remove_dir_all(dir).unwrap();
    }
}
