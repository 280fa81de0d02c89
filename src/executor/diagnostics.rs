use std::fmt::Display;
use std::time::Duration;

use crate::executor::TaskExecution;

/// Timings of a completed run, one entry per task in execution order.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub executions: Vec<TaskExecution>,
}

impl Diagnostics {
    /// Wall time from the start of the first task to the end of the last one.
    pub fn total(&self) -> Duration {
        match (self.executions.first(), self.executions.last()) {
            (Some(first), Some(last)) => (last.start + last.duration).duration_since(first.start),
            _ => Duration::ZERO,
        }
    }

    /// Renders a plain text waterfall, one row per task, with the bar offset
    /// and width proportional to the task's start and duration.
    pub fn render_waterfall(&self, width: usize) -> String {
        use std::fmt::Write;

        let mut output = String::new();

        let Some(first) = self.executions.first() else {
            return "No tasks ran\n".to_string();
        };

        let total_micros = self.total().as_micros().max(1) as f64;
        let label_width = self
            .executions
            .iter()
            .map(|exec| exec.task.as_str().len())
            .max()
            .unwrap_or(0);

        for exec in &self.executions {
            let offset = exec.start.duration_since(first.start).as_micros() as f64;
            let duration = exec.duration.as_micros() as f64;

            let pad = ((offset / total_micros) * width as f64) as usize;
            let bar = (((duration / total_micros) * width as f64) as usize).max(1);

            writeln!(
                output,
                "{:<label_width$} |{}{} {}",
                exec.task.as_str(),
                " ".repeat(pad.min(width)),
                "#".repeat(bar.min(width)),
                format_micros(duration),
            )
            .unwrap();
        }

        output
    }
}

impl Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, exec) in self.executions.iter().enumerate() {
            let micros = exec.duration.as_micros() as f64;
            writeln!(f, "{:>3}. {} {}", i + 1, exec.task, format_micros(micros))?;
        }

        write!(f, "total {}", format_micros(self.total().as_micros() as f64))
    }
}

fn format_micros(micros: f64) -> String {
    if micros < 1000.0 {
        format!("{:.0}µs", micros)
    } else {
        format!("{:.2}ms", micros / 1000.0)
    }
}
