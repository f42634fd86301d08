//! Script materialization: ordered commands to an executable script.

use crate::Result;

/// Turns a job's command list into one executable script.
pub trait ScriptMaterializer: Send + Sync {
    fn materialize(&self, commands: &[String]) -> Result<Vec<u8>>;
}

/// POSIX shell script runner. The first failing command aborts the script.
#[derive(Debug, Clone)]
pub struct ShellScript {
    interpreter: String,
    trace: bool,
}

impl ShellScript {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            trace: false,
        }
    }

    /// Echo each command to stderr before running it (`set -x`).
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}

impl Default for ShellScript {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

impl ScriptMaterializer for ShellScript {
    fn materialize(&self, commands: &[String]) -> Result<Vec<u8>> {
        let mut script = format!("#!{}\nset -e\n", self.interpreter);
        if self.trace {
            script.push_str("set -x\n");
        }
        for command in commands {
            script.push_str(command.trim_end_matches('\n'));
            script.push('\n');
        }
        Ok(script.into_bytes())
    }
}
