use crate::error::{SessionError, SessionResult};
use cuex_core::TestCondition;
use std::path::{Path, PathBuf};

/// Subject and test block the operator bound at start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    subject_id: String,
    test_number: u8,
    base_dir: PathBuf,
}

impl Session {
    pub fn new(subject_id: impl Into<String>, test_number: u8, base_dir: impl Into<PathBuf>) -> SessionResult<Self> {
        let subject_id = subject_id.into().trim().to_string();
        if subject_id.is_empty() || subject_id.contains(['/', '\\']) || subject_id == ".." {
            return Err(SessionError::InvalidSubject(subject_id));
        }
        if !matches!(test_number, 1 | 2) {
            return Err(SessionError::InvalidTestNumber(test_number));
        }
        Ok(Self {
            subject_id,
            test_number,
            base_dir: base_dir.into(),
        })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn test_number(&self) -> u8 {
        self.test_number
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Tests the operator may start in this session.
    pub fn tests(&self) -> &'static [TestCondition] {
        TestCondition::for_test_number(self.test_number)
    }

    pub fn check(&self, test: TestCondition) -> SessionResult<()> {
        if test.test_number() == self.test_number {
            Ok(())
        } else {
            Err(SessionError::WrongTest {
                test,
                number: self.test_number,
            })
        }
    }

    /// `<base>/subject_<id>/test_<n>/<test name>`
    pub fn test_dir(&self, test: TestCondition) -> PathBuf {
        self.base_dir
            .join(format!("subject_{}", self.subject_id))
            .join(format!("test_{}", self.test_number))
            .join(test.name())
    }

    pub fn ensure_test_dir(&self, test: TestCondition) -> SessionResult<PathBuf> {
        let dir = self.test_dir(test);
        std::fs::create_dir_all(&dir).map_err(|source| SessionError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_follows_layout() {
        let s = Session::new("017", 2, "/data").unwrap();
        assert_eq!(
            s.test_dir(TestCondition::StroopAlcoholOlfactory),
            PathBuf::from("/data/subject_017/test_2/Stroop Multisensory Alcohol (Visual & Olfactory)")
        );
    }

    #[test]
    fn binding_is_validated() {
        assert!(matches!(Session::new(" ", 1, "."), Err(SessionError::InvalidSubject(_))));
        assert!(matches!(Session::new("a/b", 1, "."), Err(SessionError::InvalidSubject(_))));
        assert!(matches!(Session::new("7", 3, "."), Err(SessionError::InvalidTestNumber(3))));
    }

    #[test]
    fn only_tests_of_the_bound_block_are_allowed() {
        let s = Session::new("7", 1, ".").unwrap();
        assert!(s.tests().iter().all(|t| t.is_passive()));
        assert!(s.check(TestCondition::UnisensoryAlcoholVisual).is_ok());
        assert!(matches!(
            s.check(TestCondition::StroopNeutralTactile),
            Err(SessionError::WrongTest { number: 1, .. })
        ));
    }

    #[test]
    fn ensure_creates_the_directory() {
        let base = std::env::temp_dir().join(format!("cuex-session-{}", std::process::id()));
        let s = Session::new("9", 1, &base).unwrap();
        let dir = s.ensure_test_dir(TestCondition::UnisensoryNeutralVisual).unwrap();
        assert!(dir.is_dir());
        std::fs::remove_dir_all(base).unwrap();
    }
}
