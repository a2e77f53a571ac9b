//! Demand evaluation: which blocks apply to this host, and which
//! instruction set each block contributes.
//!
//! Evaluation is a two-step affair. [`ApplicableDemands::evaluate`] selects
//! the applicable blocks — the default block always, a conditional block
//! when its selector parses and holds on the host. [`resolve_probes`] then
//! runs each block's `unless` probe once, fixing its [`Fulfillment`] for the
//! block's lifetime: either the block's own instructions apply, or the probe
//! found an external tool and the `unless` body substitutes as a complete
//! alternate instruction set (not a patch).
//!
//! [`resolve_probes`]: ApplicableDemands::resolve_probes

use std::time::Duration;

use quay_schema::{Bindings, DemandBlock, DemandSet, Installer, Settings};

use crate::host::HostContext;
use crate::probe::probe;

/// How an applicable block is fulfilled, decided once after probing.
#[derive(Debug, Clone)]
pub enum Fulfillment {
    /// The block's own instructions apply.
    Primary,
    /// The probe matched: the `unless` body applies, and these captured
    /// bindings are substituted into every field read.
    Alternative(Bindings),
}

/// One applicable demand block with its resolved fulfillment.
#[derive(Debug, Clone)]
pub struct ResolvedDemand {
    /// Selector text, or `None` for the default block.
    pub selector: Option<String>,
    /// The block as declared (including its `unless`, if any).
    pub block: DemandBlock,
    /// Which instruction set applies.
    pub fulfillment: Fulfillment,
}

impl ResolvedDemand {
    fn effective(&self) -> (&DemandBlock, Option<&Bindings>) {
        match &self.fulfillment {
            Fulfillment::Alternative(bindings) => {
                let block = self
                    .block
                    .unless
                    .as_ref()
                    .map_or(&self.block, |unless| unless.block.as_ref());
                (block, Some(bindings))
            }
            Fulfillment::Primary => (&self.block, None),
        }
    }

    /// The effective `error` precondition, substituted.
    pub fn error(&self) -> Option<String> {
        let (block, bindings) = self.effective();
        block
            .error
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| substitute(text, bindings))
    }

    /// The effective warning, substituted.
    pub fn warning(&self) -> Option<String> {
        let (block, bindings) = self.effective();
        block
            .warning
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| substitute(text, bindings))
    }

    /// The effective message, substituted.
    pub fn message(&self) -> Option<String> {
        let (block, bindings) = self.effective();
        block
            .message
            .as_deref()
            .filter(|text| !text.is_empty())
            .map(|text| substitute(text, bindings))
    }

    /// The effective `(id, range)` requirements, substituted.
    pub fn requires(&self) -> Vec<(String, String)> {
        let (block, bindings) = self.effective();
        substitute_pairs(&block.requires, bindings)
    }

    /// The effective see-also references, substituted.
    pub fn see_also(&self) -> Vec<(String, String)> {
        let (block, bindings) = self.effective();
        substitute_pairs(&block.see_also, bindings)
    }

    /// The effective installer entries, substituted.
    pub fn installers(&self) -> Vec<Installer> {
        let (block, bindings) = self.effective();
        block
            .install
            .iter()
            .map(|installer| substitute_installer(installer, bindings))
            .collect()
    }

    /// The effective export bundle, substituted.
    pub fn settings(&self) -> Settings {
        let (block, bindings) = self.effective();
        substitute_settings(&block.settings, bindings)
    }
}

/// The ordered applicable blocks of one artifact on one host.
#[derive(Debug, Clone)]
pub struct ApplicableDemands {
    /// Applicable blocks: the default block first, then conditional blocks
    /// in declaration order.
    pub demands: Vec<ResolvedDemand>,
}

impl ApplicableDemands {
    /// Select the applicable blocks for `host`.
    ///
    /// The default block is always included. A conditional block is included
    /// iff its selector parsed and evaluates true; blocks that failed to
    /// parse (already recorded in the manifest's diagnostics) are skipped
    /// without failing the evaluation.
    pub fn evaluate(set: &DemandSet, host: &HostContext) -> Self {
        let mut demands = vec![ResolvedDemand {
            selector: None,
            block: set.default.clone(),
            fulfillment: Fulfillment::Primary,
        }];
        for conditional in &set.conditional {
            let (Some(query), Some(block)) = (&conditional.query, &conditional.block) else {
                continue;
            };
            if query.evaluate(&|fact| host.has_feature(fact)) {
                demands.push(ResolvedDemand {
                    selector: Some(conditional.selector.clone()),
                    block: block.clone(),
                    fulfillment: Fulfillment::Primary,
                });
            }
        }
        Self { demands }
    }

    /// Run every block's `unless` probe once and fix the fulfillments.
    ///
    /// Probes run strictly one at a time so "first candidate wins" stays
    /// deterministic.
    pub async fn resolve_probes(&mut self, host: &HostContext, timeout: Option<Duration>) {
        for demand in &mut self.demands {
            if let Some(unless) = &demand.block.unless {
                if let Some(bindings) = probe(unless, host, timeout).await {
                    demand.fulfillment = Fulfillment::Alternative(bindings);
                }
            }
        }
    }

    /// Every effective non-empty `error` precondition, per block.
    pub fn errors(&self) -> Vec<String> {
        self.demands.iter().filter_map(ResolvedDemand::error).collect()
    }

    /// Every effective warning, per block.
    pub fn warnings(&self) -> Vec<String> {
        self.demands.iter().filter_map(ResolvedDemand::warning).collect()
    }

    /// Every effective message, per block.
    pub fn messages(&self) -> Vec<String> {
        self.demands.iter().filter_map(ResolvedDemand::message).collect()
    }

    /// The union of all effective requirements, in block declaration order.
    pub fn requires(&self) -> Vec<(String, String)> {
        self.demands.iter().flat_map(|d| d.requires()).collect()
    }

    /// The union of all effective installer entries, in block declaration
    /// order.
    pub fn installers(&self) -> Vec<Installer> {
        self.demands.iter().flat_map(|d| d.installers()).collect()
    }

    /// Every effective export bundle, in block declaration order.
    pub fn settings(&self) -> Vec<Settings> {
        self.demands.iter().map(ResolvedDemand::settings).collect()
    }
}

fn substitute(text: &str, bindings: Option<&Bindings>) -> String {
    match bindings {
        Some(bindings) => bindings.substitute(text),
        None => text.to_string(),
    }
}

fn substitute_pairs(pairs: &[(String, String)], bindings: Option<&Bindings>) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (substitute(k, bindings), substitute(v, bindings)))
        .collect()
}

fn substitute_list(list: &[String], bindings: Option<&Bindings>) -> Vec<String> {
    list.iter().map(|v| substitute(v, bindings)).collect()
}

fn substitute_list_pairs(
    pairs: &[(String, Vec<String>)],
    bindings: Option<&Bindings>,
) -> Vec<(String, Vec<String>)> {
    pairs
        .iter()
        .map(|(k, v)| (substitute(k, bindings), substitute_list(v, bindings)))
        .collect()
}

fn substitute_settings(settings: &Settings, bindings: Option<&Bindings>) -> Settings {
    Settings {
        defines: substitute_pairs(&settings.defines, bindings),
        paths: substitute_list_pairs(&settings.paths, bindings),
        tools: substitute_pairs(&settings.tools, bindings),
        variables: substitute_list_pairs(&settings.variables, bindings),
        aliases: substitute_pairs(&settings.aliases, bindings),
        locations: substitute_pairs(&settings.locations, bindings),
        properties: substitute_list_pairs(&settings.properties, bindings),
    }
}

fn substitute_installer(installer: &Installer, bindings: Option<&Bindings>) -> Installer {
    match installer {
        Installer::Unzip(archive) => Installer::Unzip(substitute_archive(archive, bindings)),
        Installer::Untar(archive) => Installer::Untar(substitute_archive(archive, bindings)),
        Installer::Nupkg(nupkg) => {
            let mut nupkg = nupkg.clone();
            nupkg.location = substitute(&nupkg.location, bindings);
            Installer::Nupkg(nupkg)
        }
        Installer::Git(git) => {
            let mut git = git.clone();
            git.location = substitute(&git.location, bindings);
            git.commit = git.commit.as_deref().map(|c| substitute(c, bindings));
            Installer::Git(git)
        }
    }
}

fn substitute_archive(
    archive: &quay_schema::ArchiveInstaller,
    bindings: Option<&Bindings>,
) -> quay_schema::ArchiveInstaller {
    let mut archive = archive.clone();
    archive.locations = substitute_list(&archive.locations, bindings);
    archive
}
