use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};

/// Terminal progress for an exploration run. Shared with the explorer's
/// progress callback, hence the atomic instead of a plain flag.
pub struct ExploreProgress {
    bar: Option<ProgressBar>,
    finished: AtomicBool,
}

impl ExploreProgress {
    pub fn new(max_pages: u64, enabled: bool) -> Self {
        let bar = if enabled {
            let pb = ProgressBar::new(max_pages);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} pages {msg}")
                    .expect("Invalid progress bar template")
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        Self {
            bar,
            finished: AtomicBool::new(false),
        }
    }

    pub fn update(&self, discovered: usize, captured: usize, url: &str) {
        if let Some(ref pb) = self.bar {
            pb.set_position(captured as u64);
            pb.set_message(format!("({} discovered) {}", discovered, shorten(url, 48)));
        }
    }

    pub fn finish(&self) {
        // If we've already finished once, don't finish again or clear the message later.
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(ref pb) = self.bar {
            pb.finish_with_message("✓ Exploration complete");
        }
    }
}

impl Drop for ExploreProgress {
    fn drop(&mut self) {
        // Only auto-clear the progress bar if we haven't explicitly finished it.
        if !self.finished.load(Ordering::SeqCst) {
            if let Some(ref pb) = self.bar {
                pb.finish_and_clear();
            }
        }
    }
}

fn shorten(url: &str, max: usize) -> String {
    let count = url.chars().count();
    if count <= max {
        return url.to_string();
    }
    let tail: String = url.chars().skip(count - (max - 3)).collect();
    format!("...{}", tail)
}
