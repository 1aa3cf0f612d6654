//! Hookmark links via the `hook` command-line tool.

use std::process::Command;

use tracing::info;

use crate::error::{Result, SyncError};

pub trait LinkHelper {
    /// Link two URIs or paths in both directions.
    fn link(&self, a: &str, b: &str) -> Result<()>;

    /// Link with an explicit display name for the pair.
    fn link_named(&self, name: &str, a: &str, b: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Hookmark {
    hook_path: String,
    dry_run: bool,
}

impl Hookmark {
    pub fn new(hook_path: impl Into<String>, dry_run: bool) -> Self {
        Self {
            hook_path: hook_path.into(),
            dry_run,
        }
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        if self.dry_run {
            println!("[dry-run] would run: {} {}", self.hook_path, args.join(" "));
            return Ok(());
        }
        let out = Command::new(&self.hook_path)
            .args(args)
            .output()
            .map_err(|e| SyncError::Command(self.hook_path.clone(), e.to_string()))?;
        if !out.status.success() {
            return Err(SyncError::Command(
                self.hook_path.clone(),
                format!(
                    "{}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
        }
        Ok(())
    }
}

impl LinkHelper for Hookmark {
    fn link(&self, a: &str, b: &str) -> Result<()> {
        self.run(&["link", a, b])?;
        info!(%a, %b, "hooked");
        Ok(())
    }

    fn link_named(&self, name: &str, a: &str, b: &str) -> Result<()> {
        self.run(&["link", "--name", name, a, b])?;
        info!(%name, %a, %b, "hooked");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records every link instead of running `hook`.
    #[derive(Default)]
    pub struct RecordingLinker {
        pub links: RefCell<Vec<(String, String)>>,
        pub named: RefCell<Vec<(String, String, String)>>,
    }

    impl LinkHelper for RecordingLinker {
        fn link(&self, a: &str, b: &str) -> Result<()> {
            self.links.borrow_mut().push((a.to_string(), b.to_string()));
            Ok(())
        }

        fn link_named(&self, name: &str, a: &str, b: &str) -> Result<()> {
            self.named
                .borrow_mut()
                .push((name.to_string(), a.to_string(), b.to_string()));
            Ok(())
        }
    }

    #[test]
    fn test_dry_run_does_not_execute() {
        let hook = Hookmark::new("/nonexistent/hook", true);
        assert!(hook.link("a", "b").is_ok());
    }

    #[test]
    fn test_missing_binary_is_command_error() {
        let hook = Hookmark::new("/nonexistent/hook", false);
        assert!(matches!(hook.link("a", "b"), Err(SyncError::Command(_, _))));
    }
}
