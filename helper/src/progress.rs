//! Transfer progress lines on stderr, in the style git prints them.
//!
//! The transport invokes these callbacks from the same thread; each call
//! redraws one `\r`-anchored line and the line is finished when a phase
//! completes.

use std::io::{self, Write};

use git2::{PackBuilderStage, Progress};

pub fn transfer(stats: &Progress<'_>) -> bool {
    if stats.total_deltas() == 0 {
        line("Receiving objects", stats.received_objects(), stats.total_objects());
    } else {
        line("Resolving deltas", stats.indexed_deltas(), stats.total_deltas());
    }
    true
}

pub fn pack(stage: PackBuilderStage, current: usize, total: usize) {
    let tip = match stage {
        PackBuilderStage::AddingObjects => "Enumerating objects",
        PackBuilderStage::Deltafication => "Compressing objects",
    };
    line(tip, current, total);
}

pub fn push_transfer(current: usize, total: usize, _bytes: usize) {
    if total > 0 {
        line("Writing objects", current, total);
    }
}

fn line(tip: &str, current: usize, total: usize) {
    let mut stderr = io::stderr().lock();
    if total == 0 {
        let _ = write!(stderr, "\r{tip}: {current}");
    } else {
        let _ = write!(
            stderr,
            "\r{tip}: {}% ({current}/{total})",
            current * 100 / total
        );
        if current == total {
            let _ = writeln!(stderr);
        }
    }
    let _ = stderr.flush();
}
