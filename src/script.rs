//! Test script loading
//!
//! A script is a YAML document listing define directives and test cases in
//! the order they should run:
//!
//! ```yaml
//! name: arithmetic
//! steps:
//!   - define: "x = 5"
//!   - test: "x + 1"
//!     expect: "6"
//!   - test: "range(3)"
//!     bag: "[2, 0, 1]"
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};
use crate::sequencer::Sequencer;

/// A complete test script loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct Script {
    /// Name of the script, used in the summary
    pub name: String,
    /// Optional description of what the script covers
    pub description: Option<String>,
    /// Steps in execution order
    #[serde(default)]
    pub steps: Vec<ScriptStep>,
}

/// A single step of a script
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ScriptStep {
    Define(DefineStep),
    Test(TestStep),
}

/// Bind a name for later tests
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DefineStep {
    /// Assignment source, e.g. `tbl = table('users')`
    pub define: String,
}

/// Run a query on both servers
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TestStep {
    /// Construction expression
    pub test: String,
    /// Expected value; omitted means only errors are checked
    pub expect: Option<String>,
    /// Expected elements in any order, as a literal list
    pub bag: Option<String>,
}

impl Script {
    /// Parse a script from YAML text
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::script(origin, e))
    }

    /// Queue every step on a sequencer
    ///
    /// Fails on the first invalid define or bag expectation; the steps
    /// queued before it stay queued.
    pub fn enqueue_into(&self, sequencer: &mut Sequencer) -> Result<()> {
        for step in &self.steps {
            match step {
                ScriptStep::Define(step) => sequencer.define(&step.define)?,
                ScriptStep::Test(step) => match (&step.expect, &step.bag) {
                    (Some(_), Some(_)) => {
                        return Err(Error::script(
                            &self.name,
                            format!("test '{}' has both `expect` and `bag`", step.test),
                        ))
                    }
                    (None, Some(bag)) => {
                        let expectation = sequencer.bag(bag)?;
                        sequencer.test_with(&step.test, expectation)?;
                    }
                    (expect, None) => {
                        sequencer.test(&step.test, expect.as_deref().unwrap_or_default())?
                    }
                },
            }
        }
        Ok(())
    }

    /// Number of test steps
    pub fn test_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, ScriptStep::Test(_)))
            .count()
    }
}

/// Load a script from a YAML file
pub fn load_script(path: &Path) -> Result<Script> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;
    Script::parse(&content, &path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::RunOptions;
    use crate::sequencer::SessionState;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCRIPT: &str = r#"
name: arithmetic
description: Basic arithmetic and sequences
steps:
  - define: "x = 5"
  - test: "x + 1"
    expect: "6"
  - test: "range(3)"
    bag: "[2, 0, 1]"
  - test: "table_create('t')"
"#;

    #[test]
    fn test_parse_script() {
        let script = Script::parse(SCRIPT, "inline").unwrap();
        assert_eq!(script.name, "arithmetic");
        assert_eq!(script.description.as_deref(), Some("Basic arithmetic and sequences"));
        assert_eq!(script.steps.len(), 4);
        assert_eq!(script.test_count(), 3);
        assert_eq!(
            script.steps[0],
            ScriptStep::Define(DefineStep {
                define: "x = 5".to_string()
            })
        );
        assert_eq!(
            script.steps[3],
            ScriptStep::Test(TestStep {
                test: "table_create('t')".to_string(),
                expect: None,
                bag: None,
            })
        );
    }

    #[test]
    fn test_load_script_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SCRIPT.as_bytes()).unwrap();

        let script = load_script(file.path()).unwrap();
        let mut seq = Sequencer::new(RunOptions::default());
        script.enqueue_into(&mut seq).unwrap();
        assert_eq!(seq.pending(), 4);
        assert_eq!(seq.state(), SessionState::Idle);
    }

    #[test]
    fn test_missing_file() {
        let result = load_script(Path::new("/nonexistent/script.yaml"));
        assert!(matches!(result, Err(Error::FileRead { .. })));
    }

    #[test]
    fn test_unknown_step_shape() {
        let result = Script::parse("name: bad\nsteps:\n  - query: \"1\"\n", "bad.yaml");
        assert!(matches!(result, Err(Error::Script { .. })));
        let result = Script::parse("name: bad\nsteps:\n  - test: \"1\"\n    expected: \"1\"\n", "bad.yaml");
        assert!(matches!(result, Err(Error::Script { .. })));
    }

    #[test]
    fn test_malformed_yaml_names_script() {
        let err = Script::parse("name: [unclosed\nsteps: []\n", "broken.yaml").unwrap_err();
        assert!(matches!(&err, Error::Script { path, .. } if path == "broken.yaml"));
        assert!(err.to_string().starts_with("Invalid test script 'broken.yaml'"));
    }

    #[test]
    fn test_invalid_define_fails_enqueue() {
        let script = Script::parse(
            "name: bad\nsteps:\n  - define: \"y = nope\"\n",
            "bad.yaml",
        )
        .unwrap();
        let mut seq = Sequencer::new(RunOptions::default());
        assert!(matches!(
            script.enqueue_into(&mut seq),
            Err(Error::Definition { .. })
        ));
    }

    #[test]
    fn test_expect_and_bag_conflict() {
        let script = Script::parse(
            "name: bad\nsteps:\n  - test: \"range(2)\"\n    expect: \"[0, 1]\"\n    bag: \"[1, 0]\"\n",
            "bad.yaml",
        )
        .unwrap();
        let mut seq = Sequencer::new(RunOptions::default());
        assert!(matches!(
            script.enqueue_into(&mut seq),
            Err(Error::Script { .. })
        ));
    }
}
