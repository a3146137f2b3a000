use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::cluster::LogCluster;
use crate::config::{EngineType, TemplateMinerConfig};
use crate::drain::{ChangeType, Drain, DrainEngine, DrainParams, MatchStrategy};
use crate::error::TemplateMinerError;
use crate::jaccard::JaccardDrain;
use crate::masking::{LogMasker, MaskingInstruction};
use crate::persistence::PersistenceHandler;
use crate::profiler::{NullProfiler, Profiler, SimpleProfiler};
use crate::snapshot::EngineSnapshot;

/// One value recovered from a wildcard or masked slot of a template,
/// labeled with the mask name that produced the slot (`*` for plain
/// wildcards).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedParameter {
    pub value: String,
    pub mask_name: String,
}

impl ExtractedParameter {
    pub fn new(value: String, mask_name: String) -> Self {
        Self { value, mask_name }
    }
}

/// What one mining step did.
#[derive(Debug, Clone, Serialize)]
pub struct MiningResult {
    pub change_type: ChangeType,
    pub cluster_id: u64,
    pub cluster_size: u64,
    pub template_mined: String,
    pub cluster_count: usize,
}

/// Compiled parameter-extraction regex for one `(template, exact)` pair,
/// with capture-group names paired to mask names in template textual order.
struct ExtractionPattern {
    regex: fancy_regex::Regex,
    groups: Vec<(String, String)>,
}

/// The mining facade: masks each line, feeds it to the engine, applies the
/// snapshot policy, and recovers parameter values from mined templates.
pub struct TemplateMiner {
    pub config: TemplateMinerConfig,
    pub drain: Box<dyn DrainEngine>,
    pub masker: LogMasker,
    persistence_handler: Option<Box<dyn PersistenceHandler>>,
    parameter_extraction_cache: Mutex<LruCache<(String, bool), Arc<ExtractionPattern>>>,
    profiler: Box<dyn Profiler>,
    last_save_time: Instant,
}

impl TemplateMiner {
    pub fn new(
        config: TemplateMinerConfig,
        persistence_handler: Option<Box<dyn PersistenceHandler>>,
    ) -> anyhow::Result<Self> {
        log::info!("starting template miner");

        let mut instructions = Vec::with_capacity(config.masking_instructions.len());
        for instruction_config in &config.masking_instructions {
            instructions.push(MaskingInstruction::from_config(instruction_config)?);
        }
        let masker = LogMasker::new(instructions, &config.mask_prefix, &config.mask_suffix);

        let params = DrainParams {
            depth: config.drain_depth,
            sim_th: config.drain_sim_th,
            max_children: config.drain_max_children,
            max_clusters: config.drain_max_clusters,
            extra_delimiters: config.drain_extra_delimiters.clone(),
            param_str: format!("{}*{}", config.mask_prefix, config.mask_suffix),
            parametrize_numeric_tokens: config.parametrize_numeric_tokens,
        };
        let drain: Box<dyn DrainEngine> = match config.engine {
            EngineType::Drain => Box::new(Drain::new(params)?),
            EngineType::JaccardDrain => Box::new(JaccardDrain::new(params)?),
        };

        let profiler: Box<dyn Profiler> = if config.profiling_enabled {
            Box::new(SimpleProfiler::new())
        } else {
            Box::new(NullProfiler)
        };

        let cache_capacity = NonZeroUsize::new(config.parameter_extraction_cache_capacity)
            .ok_or_else(|| {
                TemplateMinerError::ConfigInvalid(
                    "parameter_extraction_cache_capacity must be non-zero".to_string(),
                )
            })?;

        let mut miner = Self {
            config,
            drain,
            masker,
            persistence_handler,
            parameter_extraction_cache: Mutex::new(LruCache::new(cache_capacity)),
            profiler,
            last_save_time: Instant::now(),
        };

        if miner.persistence_handler.is_some()
            && let Err(e) = miner.load_state()
        {
            log::warn!("failed to load state, starting empty: {e}");
        }

        Ok(miner)
    }

    /// Restores the engine from the persistence collaborator. A missing
    /// snapshot is not an error; an unreadable one is discarded with a
    /// warning and the engine stays empty.
    pub fn load_state(&mut self) -> anyhow::Result<()> {
        log::info!("checking for saved state");

        let Some(handler) = self.persistence_handler.as_mut() else {
            return Ok(());
        };
        let Some(state) = handler.load_state()? else {
            log::info!("saved state not found");
            return Ok(());
        };

        let snapshot = match EngineSnapshot::decode(&state, self.config.snapshot_compress_state) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("discarding unreadable snapshot, starting empty: {e}");
                return Ok(());
            }
        };

        snapshot.restore(self.drain.core_mut());
        log::info!(
            "restored {} clusters built from {} messages",
            self.drain.core().cluster_count(),
            self.drain.core().get_total_cluster_size()
        );
        Ok(())
    }

    /// Hands the current engine state to the persistence collaborator.
    pub fn save_state(&mut self, snapshot_reason: &str) -> anyhow::Result<()> {
        let Some(handler) = self.persistence_handler.as_mut() else {
            return Ok(());
        };

        let snapshot = EngineSnapshot::capture(self.drain.core());
        let state = snapshot.encode(self.config.snapshot_compress_state)?;
        log::info!(
            "saving state of {} clusters with {} messages, {} bytes, reason: {}",
            snapshot.clusters.len(),
            snapshot.clusters.iter().map(|c| c.size).sum::<u64>(),
            state.len(),
            snapshot_reason
        );
        handler.save_state(&state)?;
        self.last_save_time = Instant::now();
        Ok(())
    }

    fn get_snapshot_reason(&self, change_type: ChangeType, cluster_id: u64) -> Option<String> {
        if change_type != ChangeType::None {
            return Some(format!("{change_type} ({cluster_id})"));
        }

        let interval = Duration::from_secs(self.config.snapshot_interval_minutes * 60);
        if self.last_save_time.elapsed() >= interval {
            return Some("periodic".to_string());
        }

        None
    }

    /// Mines one log line and reports the cluster it landed in. Saves a
    /// snapshot when the model changed, or periodically while it does not.
    pub fn add_log_message(&mut self, log_message: &str) -> anyhow::Result<MiningResult> {
        self.profiler.start_section("total");

        self.profiler.start_section("mask");
        let masked_content = self.masker.mask(log_message);
        self.profiler.end_section("mask");

        self.profiler.start_section("drain");
        let (cluster, change_type) = self.drain.add_log_message(&masked_content);
        self.profiler.end_section("drain");

        let result = MiningResult {
            change_type,
            cluster_id: cluster.cluster_id,
            cluster_size: cluster.size,
            template_mined: cluster.get_template(),
            cluster_count: self.drain.core().cluster_count(),
        };

        if self.persistence_handler.is_some() {
            self.profiler.start_section("save_state");
            let save_result = match self.get_snapshot_reason(change_type, cluster.cluster_id) {
                Some(reason) => self.save_state(&reason),
                None => Ok(()),
            };
            self.profiler.end_section("save_state");
            save_result?;
        }

        self.profiler.end_section("total");
        self.profiler
            .report(Duration::from_secs(self.config.profiling_report_sec));

        Ok(result)
    }

    /// Matches a line against the mined model without changing it. See
    /// [`MatchStrategy`] for the lookup/scan trade-off.
    pub fn match_cluster(&self, log_message: &str, strategy: MatchStrategy) -> Option<LogCluster> {
        let masked_content = self.masker.mask(log_message);
        self.drain.match_cluster(&masked_content, strategy)
    }

    /// Recovers the parameter values that filled the wildcard and masked
    /// slots of `log_template` in `log_message`, in template order.
    ///
    /// Exact matching requires each slot to match one of the patterns of
    /// the rules producing its mask name; approximate matching accepts any
    /// non-empty text. Returns `None` when the message does not correspond
    /// to the template, as opposed to a template with no parameters, which
    /// yields an empty list.
    pub fn extract_parameters(
        &self,
        log_template: &str,
        log_message: &str,
        exact_matching: bool,
    ) -> Option<Vec<ExtractedParameter>> {
        let mut content = log_message.to_string();
        for delimiter in &self.config.drain_extra_delimiters {
            content = content.replace(delimiter.as_str(), " ");
        }

        let pattern = self.extraction_pattern(log_template, exact_matching)?;
        let captures = pattern.regex.captures(&content).ok()??;

        let mut extracted_parameters = Vec::new();
        for (group_name, mask_name) in &pattern.groups {
            if let Some(value) = captures.name(group_name) {
                extracted_parameters.push(ExtractedParameter::new(
                    value.as_str().to_string(),
                    mask_name.clone(),
                ));
            }
        }

        Some(extracted_parameters)
    }

    /// Parameter values only, via approximate matching.
    #[deprecated(note = "use `extract_parameters` with exact matching")]
    pub fn get_parameter_list(&self, log_template: &str, log_message: &str) -> Vec<String> {
        match self.extract_parameters(log_template, log_message, false) {
            Some(parameters) => parameters.into_iter().map(|p| p.value).collect(),
            None => Vec::new(),
        }
    }

    fn extraction_pattern(
        &self,
        log_template: &str,
        exact_matching: bool,
    ) -> Option<Arc<ExtractionPattern>> {
        let key = (log_template.to_string(), exact_matching);
        let mut cache = self
            .parameter_extraction_cache
            .lock()
            .expect("extraction cache poisoned");
        if let Some(pattern) = cache.get(&key) {
            return Some(pattern.clone());
        }

        let (template_regex, group_to_mask) =
            self.get_template_parameter_extraction_regex(log_template, exact_matching);
        let regex = fancy_regex::Regex::new(&template_regex).ok()?;

        // group definitions appear in template order; recover that order
        // from each group's position in the pattern
        let mut groups: Vec<(usize, String, String)> = group_to_mask
            .into_iter()
            .map(|(group_name, mask_name)| {
                let position = template_regex
                    .find(&format!("(?P<{group_name}>"))
                    .unwrap_or(usize::MAX);
                (position, group_name, mask_name)
            })
            .collect();
        groups.sort();

        let pattern = Arc::new(ExtractionPattern {
            regex,
            groups: groups
                .into_iter()
                .map(|(_, group_name, mask_name)| (group_name, mask_name))
                .collect(),
        });
        cache.put(key, pattern.clone());
        Some(pattern)
    }

    /// Builds a regex matching `log_template` with one named capture group
    /// per wildcard or masked slot, plus the group-to-mask-name map.
    pub fn get_template_parameter_extraction_regex(
        &self,
        log_template: &str,
        exact_matching: bool,
    ) -> (String, HashMap<String, String>) {
        let mut param_group_to_mask: HashMap<String, String> = HashMap::new();
        let mut param_name_counter: usize = 0;

        let mut mask_names: HashSet<String> =
            self.masker.mask_names().map(str::to_string).collect();
        // the catch-all wildcard of the engine itself
        mask_names.insert("*".to_string());

        let escaped_prefix = regex::escape(&self.masker.mask_prefix);
        let escaped_suffix = regex::escape(&self.masker.mask_suffix);

        let mut template_regex = regex::escape(log_template);
        // accept any whitespace run between tokens; this must precede the
        // placeholder inlining so spaces inside mask patterns stay intact
        template_regex = template_regex.replace(' ', r"\s+");

        for mask_name in &mask_names {
            let search_str = format!(
                "{escaped_prefix}{}{escaped_suffix}",
                regex::escape(mask_name)
            );
            // replace one occurrence at a time so every slot gets its own
            // capture group
            while template_regex.contains(&search_str) {
                let capture_regex = self.create_capture_regex(
                    mask_name,
                    exact_matching,
                    &mut param_name_counter,
                    &mut param_group_to_mask,
                );
                template_regex = template_regex.replacen(&search_str, &capture_regex, 1);
            }
        }

        template_regex = format!("^{template_regex}$");
        (template_regex, param_group_to_mask)
    }

    fn create_capture_regex(
        &self,
        mask_name: &str,
        exact_matching: bool,
        param_name_counter: &mut usize,
        param_group_to_mask: &mut HashMap<String, String>,
    ) -> String {
        let mut next_param_name = |counter: &mut usize| {
            let name = format!("p_{counter}");
            *counter += 1;
            name
        };

        let mut allowed_patterns: Vec<String> = Vec::new();

        if exact_matching {
            let group_def =
                regex::Regex::new(r"\(\?P<([A-Za-z_][A-Za-z0-9_]*)>").expect("group def pattern");
            let unnamed_backref =
                regex::Regex::new(r"\\[1-9]\d?").expect("unnamed backref pattern");

            for instruction in self.masker.instructions_by_mask_name(mask_name) {
                let mut pattern = instruction.pattern().to_string();

                // rename embedded named groups so inlining the same rule
                // several times cannot produce duplicate group names
                let group_names: Vec<String> = group_def
                    .captures_iter(&pattern)
                    .map(|c| c[1].to_string())
                    .collect();
                for group_name in group_names {
                    let fresh = next_param_name(param_name_counter);
                    pattern = pattern.replace(&format!("(?P<{group_name}>"), &format!("(?P<{fresh}>"));
                    pattern = pattern.replace(&format!("(?P={group_name})"), &format!("(?P={fresh})"));
                }

                // unnamed back-references cannot be re-targeted
                pattern = unnamed_backref.replace_all(&pattern, "(?:.+?)").into_owned();

                allowed_patterns.push(pattern);
            }
        }

        if !exact_matching || mask_name == "*" {
            allowed_patterns.push(".+?".to_string());
        }

        let param_group_name = next_param_name(param_name_counter);
        param_group_to_mask.insert(param_group_name.clone(), mask_name.to_string());

        format!("(?P<{param_group_name}>{})", allowed_patterns.join("|"))
    }
}
