use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Observer of the miner's internal phases. Sections may nest; each
/// `start_section` must be balanced by an `end_section`.
pub trait Profiler {
    fn start_section(&mut self, section_name: &str);
    /// Ends a section. An empty name ends the most recently started one.
    fn end_section(&mut self, section_name: &str);
    /// Emits a report if at least `period` has passed since the last one.
    fn report(&mut self, period: Duration);
}

/// No-op profiler used when profiling is disabled.
#[derive(Debug, Default)]
pub struct NullProfiler;

impl Profiler for NullProfiler {
    fn start_section(&mut self, _section_name: &str) {}
    fn end_section(&mut self, _section_name: &str) {}
    fn report(&mut self, _period: Duration) {}
}

#[derive(Debug, Default)]
struct SectionStats {
    started_at: Option<Instant>,
    sample_count: u64,
    total_time: Duration,
}

impl SectionStats {
    fn to_report_line(&self, name: &str, enclosing_time: Duration) -> String {
        let total_sec = self.total_time.as_secs_f64();

        let mut took = format!("{total_sec:>8.2} s");
        if enclosing_time > Duration::ZERO {
            took += &format!(" ({:>6.2}%)", 100.0 * total_sec / enclosing_time.as_secs_f64());
        }

        let ms_per_1k_samples = if self.sample_count > 0 {
            1_000_000.0 * total_sec / self.sample_count as f64
        } else {
            0.0
        };
        let rate = if total_sec > 0.0 {
            format!("{:>15.2} hz", self.sample_count as f64 / total_sec)
        } else {
            "N/A".to_string()
        };

        format!(
            "{name: <15}: took {took}, {:>10} samples, {ms_per_1k_samples:>7.2} ms / 1000 samples, {rate}",
            self.sample_count
        )
    }
}

/// Wall-clock profiler accumulating per-section sample counts and totals.
/// Reports are rate-limited and go through a pluggable printer; section
/// misuse is logged rather than allowed to disturb the mining path.
pub struct SimpleProfiler {
    sections: HashMap<String, SectionStats>,
    enclosing_section_name: String,
    last_started_section: String,
    last_report_at: Instant,
    printer: Box<dyn Fn(&str) + Send>,
}

impl SimpleProfiler {
    pub fn new() -> Self {
        Self::with_printer(Box::new(|report| log::info!("{report}")))
    }

    pub fn with_printer(printer: Box<dyn Fn(&str) + Send>) -> Self {
        Self {
            sections: HashMap::new(),
            enclosing_section_name: "total".to_string(),
            last_started_section: String::new(),
            last_report_at: Instant::now(),
            printer,
        }
    }
}

impl Default for SimpleProfiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Profiler for SimpleProfiler {
    fn start_section(&mut self, section_name: &str) {
        if section_name.is_empty() {
            log::warn!("ignoring start of unnamed profiling section");
            return;
        }
        self.last_started_section = section_name.to_string();

        let section = self.sections.entry(section_name.to_string()).or_default();
        if section.started_at.is_some() {
            log::warn!("profiling section {section_name} was already started, restarting it");
        }
        section.started_at = Some(Instant::now());
    }

    fn end_section(&mut self, section_name: &str) {
        let section_name = if section_name.is_empty() {
            self.last_started_section.clone()
        } else {
            section_name.to_string()
        };

        let Some(section) = self.sections.get_mut(&section_name) else {
            log::warn!("ignoring end of unknown profiling section {section_name}");
            return;
        };
        let Some(started_at) = section.started_at.take() else {
            log::warn!("ignoring end of never-started profiling section {section_name}");
            return;
        };

        section.sample_count += 1;
        section.total_time += started_at.elapsed();
    }

    fn report(&mut self, period: Duration) {
        if self.last_report_at.elapsed() < period {
            return;
        }

        let enclosing_time = self
            .sections
            .get(&self.enclosing_section_name)
            .map(|section| section.total_time)
            .unwrap_or_default();

        let mut sections: Vec<(&String, &SectionStats)> = self.sections.iter().collect();
        sections.sort_by(|(_, a), (_, b)| b.total_time.cmp(&a.total_time));

        let report = sections
            .iter()
            .map(|(name, stats)| stats.to_report_line(name, enclosing_time))
            .collect::<Vec<_>>()
            .join("\n");
        (self.printer)(&report);

        self.last_report_at = Instant::now();
    }
}
