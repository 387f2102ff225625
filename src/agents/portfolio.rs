//! Portfolio agent
//!
//! Reconstructs the user's holdings from retrieved context chunks, computes
//! derived exposure metrics, and asks its backend to narrate the findings.

use crate::agents::{format_history, AgentRequest, SpecialistAgent};
use crate::backend::{CompletionBackend, CompletionRequest};
use crate::config::AgentSettings;
use crate::models::{AgentResponse, AgentRole, Citation, Holding, ScoredChunk};
use crate::Result;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Allocation shares above these thresholds are flagged as concentrated.
const SECTOR_CONCENTRATION_LIMIT: f64 = 30.0;
const REGION_CONCENTRATION_LIMIT: f64 = 40.0;

const SYSTEM_PROMPT: &str = "You are a portfolio analyst. Using the computed metrics and \
holdings, explain the portfolio's composition and risk posture in plain language. Name \
the concrete allocation percentages you rely on, and call out any concentration flags.";

#[derive(Debug, Deserialize)]
struct PortfolioDocument {
    portfolio: PortfolioPayload,
}

#[derive(Debug, Deserialize)]
struct PortfolioPayload {
    #[serde(default)]
    holdings: Vec<Holding>,
    #[serde(default)]
    cash: f64,
}

/// Derived view over a set of holdings.
#[derive(Debug, Clone)]
pub struct PortfolioSnapshot {
    pub holdings: Vec<Holding>,
    pub cash: f64,
    pub total_value: f64,
    pub sector_allocations: HashMap<String, f64>,
    pub region_allocations: HashMap<String, f64>,
}

impl PortfolioSnapshot {
    pub fn from_holdings(holdings: Vec<Holding>, cash: f64) -> Self {
        let total_value = cash + holdings.iter().map(Holding::value).sum::<f64>();

        let mut sector_allocations: HashMap<String, f64> = HashMap::new();
        let mut region_allocations: HashMap<String, f64> = HashMap::new();

        if total_value > 0.0 {
            for holding in &holdings {
                let share = holding.value() / total_value * 100.0;
                *sector_allocations.entry(holding.sector.clone()).or_default() += share;
                *region_allocations.entry(holding.region.clone()).or_default() += share;
            }
        }

        Self {
            holdings,
            cash,
            total_value,
            sector_allocations,
            region_allocations,
        }
    }

    /// The single largest sector share, if any holdings exist.
    pub fn top_sector(&self) -> Option<(&str, f64)> {
        self.sector_allocations
            .iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(sector, share)| (sector.as_str(), *share))
    }

    /// Human-readable concentration warnings.
    pub fn concentration_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        for (sector, share) in &self.sector_allocations {
            if *share > SECTOR_CONCENTRATION_LIMIT {
                flags.push(format!(
                    "sector concentration: {:.1}% in {}",
                    share, sector
                ));
            }
        }
        for (region, share) in &self.region_allocations {
            if *share > REGION_CONCENTRATION_LIMIT {
                flags.push(format!(
                    "region concentration: {:.1}% in {}",
                    share, region
                ));
            }
        }
        flags.sort();
        flags
    }
}

pub struct PortfolioAgent {
    backend: Arc<dyn CompletionBackend>,
    settings: AgentSettings,
}

impl PortfolioAgent {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: AgentSettings) -> Self {
        Self { backend, settings }
    }

    async fn answer(&self, request: &AgentRequest) -> Result<AgentResponse> {
        let (holdings, cash, source_chunks) = parse_holdings(&request.context_chunks);

        if holdings.is_empty() {
            info!("No holdings found in retrieved context");
            return Ok(AgentResponse {
                text: "I couldn't find portfolio holdings in the indexed data. Try \
                       uploading your portfolio first."
                    .to_string(),
                citations: Vec::new(),
                confidence: 0.2,
            });
        }

        let snapshot = PortfolioSnapshot::from_holdings(holdings, cash);
        let flags = snapshot.concentration_flags();

        info!(
            holding_count = snapshot.holdings.len(),
            total_value = snapshot.total_value,
            flag_count = flags.len(),
            "Portfolio metrics computed"
        );

        let mut user_prompt = format_history(&request.history);
        user_prompt.push_str(&format_metrics(&snapshot, &flags));
        user_prompt.push_str("\nQuestion: ");
        user_prompt.push_str(&request.query);

        let completion = CompletionRequest::new(&self.settings, SYSTEM_PROMPT, user_prompt);
        let text = self.backend.complete(&completion).await?;

        let citations = source_chunks
            .iter()
            .map(|hit| Citation::Chunk {
                chunk_id: hit.chunk.id.clone(),
                source_doc_id: hit.chunk.source_doc_id.clone(),
            })
            .collect();

        Ok(AgentResponse {
            text,
            citations,
            confidence: 0.85,
        })
    }
}

fn format_metrics(snapshot: &PortfolioSnapshot, flags: &[String]) -> String {
    let mut out = String::from("Holdings:\n");
    for holding in &snapshot.holdings {
        out.push_str(&format!(
            "- {} ({}): {} shares at ${:.2}, {} / {}\n",
            holding.name,
            holding.symbol,
            holding.shares,
            holding.avg_price,
            holding.sector,
            holding.region
        ));
    }

    out.push_str(&format!(
        "\nTotal value (including ${:.0} cash): ${:.0}\n",
        snapshot.cash, snapshot.total_value
    ));

    out.push_str("Sector allocations:\n");
    let mut sectors: Vec<_> = snapshot.sector_allocations.iter().collect();
    sectors.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (sector, share) in sectors {
        out.push_str(&format!("- {}: {:.1}%\n", sector, share));
    }

    out.push_str("Region allocations:\n");
    let mut regions: Vec<_> = snapshot.region_allocations.iter().collect();
    regions.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    for (region, share) in regions {
        out.push_str(&format!("- {}: {:.1}%\n", region, share));
    }

    if flags.is_empty() {
        out.push_str("No concentration flags raised.\n");
    } else {
        out.push_str("Concentration flags:\n");
        for flag in flags {
            out.push_str(&format!("- {}\n", flag));
        }
    }

    out
}

/// Pull holdings out of retrieved chunks. Chunks are parsed as portfolio
/// JSON directly, then as an embedded `{ ... }` object when the chunk mixes
/// JSON with surrounding text. Duplicate symbols keep their first occurrence.
fn parse_holdings(chunks: &[ScoredChunk]) -> (Vec<Holding>, f64, Vec<ScoredChunk>) {
    let mut holdings = Vec::new();
    let mut seen_symbols = HashSet::new();
    let mut cash = 0.0;
    let mut source_chunks = Vec::new();

    for hit in chunks {
        let parsed = serde_json::from_str::<PortfolioDocument>(&hit.chunk.text)
            .ok()
            .or_else(|| {
                extract_embedded_object(&hit.chunk.text)
                    .and_then(|raw| serde_json::from_str::<PortfolioDocument>(&raw).ok())
            });

        let Some(document) = parsed else {
            continue;
        };

        let mut contributed = false;
        for holding in document.portfolio.holdings {
            if seen_symbols.insert(holding.symbol.clone()) {
                holdings.push(holding);
                contributed = true;
            }
        }
        if document.portfolio.cash > 0.0 {
            cash = document.portfolio.cash;
            contributed = true;
        }

        if contributed {
            source_chunks.push(hit.clone());
        }
    }

    (holdings, cash, source_chunks)
}

/// Try parsing the largest `{ ... }` block in the text.
fn extract_embedded_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(text[start..=end].to_string())
}

#[async_trait::async_trait]
impl SpecialistAgent for PortfolioAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Portfolio
    }

    async fn handle(&self, request: &AgentRequest) -> AgentResponse {
        match self.answer(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Portfolio agent failed, returning degraded response: {}", e);
                AgentResponse::degraded(
                    "I couldn't analyze the portfolio right now. Please try again shortly.",
                )
            }
        }
    }
}
