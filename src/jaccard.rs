use std::collections::HashSet;

use crate::drain::{DrainCore, DrainEngine, DrainParams};
use crate::error::TemplateMinerError;

/// Gain applied to the raw Jaccard coefficient before clipping to 1.0.
/// Token-set similarity scores systematically lower than positional
/// similarity for the same amount of agreement, so the raw value is
/// amplified to keep the default thresholds usable.
pub const JACCARD_SIM_GAIN: f64 = 1.3;

/// Match-only similarity for this variant. Templates and lines may differ
/// in length here, so a perfect 1.0 cannot be required.
pub const JACCARD_MATCH_SIM_TH: f64 = 0.8;

/// Engine variant grouping sequences by their first token and scoring
/// candidates with the Jaccard coefficient over token sets.
///
/// Unlike the positional variant, templates may be generalized across
/// sequences of different lengths: the longer sequence is kept and every
/// position whose token the two do not share becomes a wildcard.
#[derive(Debug)]
pub struct JaccardDrain {
    core: DrainCore,
}

impl JaccardDrain {
    pub fn new(params: DrainParams) -> Result<Self, TemplateMinerError> {
        Ok(Self {
            core: DrainCore::new(params)?,
        })
    }
}

impl DrainEngine for JaccardDrain {
    fn core(&self) -> &DrainCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut DrainCore {
        &mut self.core
    }

    fn root_key(&self, tokens: &[String]) -> String {
        tokens.first().cloned().unwrap_or_default()
    }

    fn path_tokens<'a>(&self, tokens: &'a [String]) -> &'a [String] {
        tokens.get(1..).unwrap_or_default()
    }

    fn seq_distance(
        &self,
        template: &[String],
        tokens: &[String],
        include_params: bool,
    ) -> (f64, usize) {
        if template.is_empty() {
            return (1.0, 0);
        }

        let param_str = self.core.param_str.as_str();
        let param_count = template.iter().filter(|t| t.as_str() == param_str).count();

        // with equal lengths, drop the positions the template has already
        // wildcarded so they do not count against the intersection
        let token_set: HashSet<&str> = if template.len() == tokens.len() && param_count > 0 {
            tokens
                .iter()
                .zip(template)
                .filter(|(_, t1)| t1.as_str() != param_str)
                .map(|(t2, _)| t2.as_str())
                .collect()
        } else {
            tokens.iter().map(String::as_str).collect()
        };

        let template_set: HashSet<&str> = if include_params {
            template
                .iter()
                .map(String::as_str)
                .filter(|t| *t != param_str)
                .collect()
        } else {
            template.iter().map(String::as_str).collect()
        };

        let union = template_set.union(&token_set).count();
        if union == 0 {
            // every position on both sides was a wildcard
            return (1.0, param_count);
        }
        let intersection = template_set.intersection(&token_set).count();

        let raw = intersection as f64 / union as f64;
        ((raw * JACCARD_SIM_GAIN).min(1.0), param_count)
    }

    fn merge_template(&self, tokens: &[String], template: &[String]) -> Vec<String> {
        let param_str = &self.core.param_str;

        if tokens.len() == template.len() {
            return tokens
                .iter()
                .zip(template)
                .map(|(token1, token2)| {
                    if token1 == token2 {
                        token2.clone()
                    } else {
                        param_str.clone()
                    }
                })
                .collect();
        }

        // unequal lengths: keep the longer sequence and wildcard every
        // position whose token the two sequences do not share
        let token_set: HashSet<&str> = tokens.iter().map(String::as_str).collect();
        let template_set: HashSet<&str> = template.iter().map(String::as_str).collect();
        let longer = if tokens.len() > template.len() {
            tokens
        } else {
            template
        };

        longer
            .iter()
            .map(|token| {
                if token_set.contains(token.as_str()) && template_set.contains(token.as_str()) {
                    token.clone()
                } else {
                    param_str.clone()
                }
            })
            .collect()
    }

    fn match_sim_th(&self) -> f64 {
        JACCARD_MATCH_SIM_TH
    }
}
