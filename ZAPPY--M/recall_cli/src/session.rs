use std::{io::Write, time::Duration};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use zappy_memory_data::{metadata, MemoryCoordinator};
use zappy_task_engine::{TaskEngine, TaskMode, TaskOutcome, TaskResult};

/// Interactive batch loop: lines queue tasks, a blank line runs them.
pub struct Session {
    memory: MemoryCoordinator,
    engine: TaskEngine,
    mode: TaskMode,
    task_ttl: Duration,
}

impl Session {
    pub const fn new(
        memory: MemoryCoordinator,
        engine: TaskEngine,
        mode: TaskMode,
        task_ttl: Duration,
    ) -> Self {
        Self {
            memory,
            engine,
            mode,
            task_ttl,
        }
    }

    /// Captures the task in short-term memory and queues it.
    pub fn submit(&self, task_text: &str) -> Result<()> {
        self.memory
            .remember_short_for(
                task_text,
                Some(self.task_ttl),
                metadata([("type", "user_task"), ("mode", self.mode.label())]),
            )
            .context("failed to capture task")?;
        self.engine.add_task(task_text, self.mode);
        Ok(())
    }

    /// Runs the queued batch, stores successful results long-term, reports every
    /// result to `out`, and empties the queue.
    pub async fn flush<W: Write>(&self, out: &mut W) -> Result<Vec<TaskResult>> {
        if self.engine.is_empty() {
            return Ok(Vec::new());
        }
        let results = self.engine.run_all().await;
        self.engine.clear();
        for result in &results {
            match &result.outcome {
                TaskOutcome::Succeeded(text) => {
                    self.memory
                        .remember_long(
                            text.as_str(),
                            metadata([
                                ("type", "task_result"),
                                ("original_task", result.task_text.as_str()),
                                ("mode", result.mode.label()),
                            ]),
                        )
                        .context("failed to store task result")?;
                    writeln!(out, "[ok] {}\n{text}", result.task_text)?;
                }
                TaskOutcome::Failed(failure) => {
                    writeln!(out, "[failed] {}: {}", result.task_text, failure.reason)?;
                }
            }
        }
        out.flush()?;
        Ok(results)
    }

    /// Reads tasks until EOF, then runs whatever is pending and shuts memory down.
    pub async fn drive<R, W>(self, input: R, out: &mut W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await.context("failed to read input")? {
            let task = line.trim();
            if task.is_empty() {
                self.flush(out).await?;
            } else {
                self.submit(task)?;
            }
        }
        self.flush(out).await?;
        self.memory.shutdown().context("failed to close memory")?;
        Ok(())
    }
}
