//! Worker titles
//!
//! Each worker advertises a human readable line describing what it is doing
//! (`Worker-3-x86 vm.vm_ip=10.0.0.4 vm.vm_name=x86-2 Task: 42 ...`). Every
//! change is logged at info level with the worker index, and the board keeps
//! the latest line per worker so the fleet can be listed at once.

use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

/// Observability hook invoked at worker phase transitions
pub trait ProcessTitle: Send + Sync {
    fn set(&self, worker_id: usize, title: &str);

    /// Called once the worker is gone
    fn clear(&self, worker_id: usize);
}

/// Latest title of every live worker
#[derive(Debug, Default)]
pub struct TitleBoard {
    titles: Mutex<BTreeMap<usize, String>>,
}

impl TitleBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current titles ordered by worker index
    pub fn snapshot(&self) -> Vec<(usize, String)> {
        self.titles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, title)| (*id, title.clone()))
            .collect()
    }
}

impl ProcessTitle for TitleBoard {
    fn set(&self, worker_id: usize, title: &str) {
        info!(worker_id, "{}", title);
        self.titles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(worker_id, title.to_string());
    }

    fn clear(&self, worker_id: usize) {
        self.titles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&worker_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_titles_are_logged_at_info() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let board = TitleBoard::new();
        tracing::subscriber::with_default(subscriber, || {
            board.set(3, "Worker-3-x86 vm.vm_ip=10.0.0.1 vm.vm_name=x86-0 building");
        });

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("INFO"), "{}", output);
        assert!(output.contains("worker_id=3"), "{}", output);
        assert!(output.contains("vm.vm_name=x86-0 building"), "{}", output);
    }

    #[test]
    fn test_board_keeps_latest_title_per_worker() {
        let board = TitleBoard::new();
        board.set(2, "Worker-2-x86 starting");
        board.set(1, "Worker-1-arm starting");
        board.set(2, "Worker-2-x86 done");

        assert_eq!(
            board.snapshot(),
            vec![
                (1, "Worker-1-arm starting".to_string()),
                (2, "Worker-2-x86 done".to_string())
            ]
        );

        board.clear(1);
        assert_eq!(board.snapshot().len(), 1);
    }
}
