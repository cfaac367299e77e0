use crossterm::{
    cursor::MoveToPreviousLine,
    queue,
    terminal::{Clear, ClearType},
};
use std::io::{self, IsTerminal, Write};
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Destination for progress rendering
pub trait ProgressOutput: Send {
    /// Print `completed` permanently, then replace the previous live block with `live`.
    fn draw(&mut self, completed: &[String], live: &[String]) -> io::Result<()>;
    /// Erase the live block, leaving only permanent lines.
    fn clear_live(&mut self) -> io::Result<()>;
}

/// Renders to stdout. When stdout is not a terminal only permanent lines are
/// written, so redirected output does not fill up with redraws.
pub struct StdTerminal {
    interactive: bool,
    live_lines: u16,
}

impl StdTerminal {
    pub fn new() -> Self {
        Self {
            interactive: io::stdout().is_terminal(),
            live_lines: 0,
        }
    }

    fn erase_live(&mut self, out: &mut impl Write) -> io::Result<()> {
        if self.live_lines > 0 {
            queue!(
                out,
                MoveToPreviousLine(self.live_lines),
                Clear(ClearType::FromCursorDown)
            )?;
            self.live_lines = 0;
        }
        Ok(())
    }
}

impl Default for StdTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressOutput for StdTerminal {
    fn draw(&mut self, completed: &[String], live: &[String]) -> io::Result<()> {
        let mut out = io::stdout().lock();

        if !self.interactive {
            for line in completed {
                writeln!(out, "{line}")?;
            }
            return out.flush();
        }

        self.erase_live(&mut out)?;
        for line in completed {
            writeln!(out, "{line}")?;
        }
        for line in live {
            writeln!(out, "{line}")?;
        }
        self.live_lines = live.len().min(u16::MAX as usize) as u16;
        out.flush()
    }

    fn clear_live(&mut self) -> io::Result<()> {
        if !self.interactive {
            return Ok(());
        }
        let mut out = io::stdout().lock();
        self.erase_live(&mut out)?;
        out.flush()
    }
}

/// Records every drawn line for assertions
#[cfg(test)]
pub struct MockTerminal {
    outputs: Arc<Mutex<Vec<String>>>,
    pub live: Vec<String>,
}

#[cfg(test)]
impl MockTerminal {
    pub fn new() -> Self {
        Self {
            outputs: Arc::new(Mutex::new(Vec::new())),
            live: Vec::new(),
        }
    }

    /// Shared view of permanent lines, usable after the terminal is boxed away.
    pub fn outputs(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.outputs)
    }
}

#[cfg(test)]
impl ProgressOutput for MockTerminal {
    fn draw(&mut self, completed: &[String], live: &[String]) -> io::Result<()> {
        self.outputs
            .lock()
            .map_err(|_| io::Error::other("poisoned"))?
            .extend(completed.iter().cloned());
        self.live = live.to_vec();
        Ok(())
    }

    fn clear_live(&mut self) -> io::Result<()> {
        self.live.clear();
        Ok(())
    }
}
