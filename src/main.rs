use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::sync::{Arc, Mutex};

use trustline::filter::{FilterLevel, WotFilter};
use trustline::gateway;
use trustline::graph::{ActorId, GraphTransport, SocialGraphEvent, TrustEdge};
use trustline::identity;
use trustline::ledger::{Ledger, MintGuard, MintQuote, QuotePurpose};
use trustline::resolver::{PaymentResolver, UreqFetch};
use trustline::scorer::{ScorerConfig, TrustScorer};
use trustline::zap::{ZapOrchestrator, ZapRequest};

#[derive(Parser)]
#[command(name = "trustline")]
#[command(about = "Web-of-trust scoring and Lightning zap tooling")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Classify an actor's trust tier from a graph snapshot
    Classify {
        /// Actor public key (64 hex chars)
        #[arg(long)]
        actor: String,
        /// Path to a JSON array of social-graph events
        #[arg(long)]
        graph: String,
    },
    /// Inspect or change the content filter preference
    Filter {
        #[command(subcommand)]
        cmd: FilterCmd,
    },
    /// Resolve a payment target into an endpoint descriptor
    Resolve {
        /// Invoice or lightning address
        target: String,
    },
    /// Prepare a zap: resolve, validate, fetch the invoice
    Zap {
        #[arg(long)]
        target: String,
        /// Recipient public key (64 hex chars)
        #[arg(long)]
        recipient: String,
        #[arg(long)]
        amount_msats: u64,
        #[arg(long)]
        comment: Option<String>,
        /// Related event id for the zap receipt
        #[arg(long)]
        event: Option<String>,
        /// Relay hint, repeatable
        #[arg(long)]
        relay: Vec<String>,
        /// Write the invoice here instead of stdout
        #[arg(long)]
        out: Option<String>,
    },
    /// Ecash ledger operations
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCmd,
    },
    /// Serve the read-only HTTP gateway
    Gateway {
        #[arg(long, default_value = "127.0.0.1:8750")]
        addr: String,
        /// Optional graph snapshot to preload
        #[arg(long)]
        graph: Option<String>,
    },
}

#[derive(Subcommand)]
enum FilterCmd {
    /// Set the threshold: all | extended | fof | trusted
    Set { level: String },
    /// Flip whether unknown actors are shown below the threshold
    ToggleUnknown,
    /// Print the current preference
    Show,
}

#[derive(Subcommand)]
enum LedgerCmd {
    /// Record a pending mint quote
    Quote {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        sats: u64,
        /// deposit | withdraw
        #[arg(long, default_value = "deposit")]
        purpose: String,
        #[arg(long)]
        invoice: String,
        #[arg(long, default_value_t = 60)]
        ttl_mins: i64,
        /// Proceed even when the mint is not in the trusted registry
        #[arg(long, default_value_t = false)]
        allow_untrusted: bool,
    },
    /// Apply a confirmed quote's balance delta
    Confirm {
        #[arg(long)]
        quote: String,
    },
    /// Credit proofs received from a trusted mint
    Receive {
        #[arg(long)]
        mint: String,
        #[arg(long)]
        sats: u64,
    },
    /// Drop expired quotes
    Expire,
    /// Print balances per mint and the total
    Balance,
    /// List the mint registry
    Mints,
}

/// Offline transport: classification works from loaded snapshots only.
struct NullTransport;

impl GraphTransport for NullTransport {
    fn outbound_edges(
        &self,
        _actor: &ActorId,
        _limit: usize,
    ) -> std::result::Result<Vec<TrustEdge>, trustline::error::GraphError> {
        Ok(Vec::new())
    }
}

/// The CLI stops at the invoice; settlement happens in the caller's wallet.
struct NoBackend;

impl trustline::zap::PaymentBackend for NoBackend {
    fn pay_invoice(
        &self,
        _invoice: &str,
    ) -> std::result::Result<trustline::zap::PaymentProof, trustline::error::PayError> {
        Err(trustline::error::PayError::PaymentFailed(
            "no settlement backend configured".into(),
        ))
    }
}

fn load_snapshot(path: &str) -> Result<Vec<SocialGraphEvent>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn build_scorer(graph: Option<&str>) -> Result<TrustScorer> {
    let own = identity::resolve_own_actor()?;
    let scorer = TrustScorer::new(own, Arc::new(NullTransport), ScorerConfig::default());
    if let Some(path) = graph {
        scorer.load_events(&load_snapshot(path)?);
    }
    Ok(scorer)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Classify { actor, graph } => {
            let actor = ActorId::parse(&actor).map_err(|e| anyhow!("{e}"))?;
            let scorer = build_scorer(Some(&graph))?;
            let indicator = scorer.classify(&actor);
            println!("{}", serde_json::to_string_pretty(&indicator)?);
        }
        Cmd::Filter { cmd } => {
            let mut filter = WotFilter::load();
            match cmd {
                FilterCmd::Set { level } => {
                    let level: FilterLevel = level.parse()?;
                    filter.set_filter_level(level);
                    filter.save()?;
                    println!("FILTER {:?}", filter.filter_level());
                }
                FilterCmd::ToggleUnknown => {
                    let show = filter.toggle_show_unknown();
                    filter.save()?;
                    println!("SHOW_UNKNOWN {show}");
                }
                FilterCmd::Show => {
                    println!("{}", toml::to_string_pretty(&filter)?);
                }
            }
        }
        Cmd::Resolve { target } => {
            let resolver = PaymentResolver::new(Arc::new(UreqFetch::default()));
            let ep = resolver.resolve(&target).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "callback": ep.callback,
                    "min_sendable": ep.min_sendable,
                    "max_sendable": ep.max_sendable,
                    "comment_allowed": ep.comment_allowed,
                    "allows_zap": ep.allows_zap,
                    "zap_pubkey": ep.zap_pubkey,
                    "fixed_invoice": ep.fixed_invoice,
                }))?
            );
        }
        Cmd::Zap {
            target,
            recipient,
            amount_msats,
            comment,
            event,
            relay,
            out,
        } => {
            let recipient = ActorId::parse(&recipient).map_err(|e| anyhow!("{e}"))?;
            let keypair = identity::load_actor_keypair().ok();
            let orchestrator = ZapOrchestrator::new(
                Arc::new(UreqFetch::default()),
                Arc::new(NoBackend),
                keypair,
            );
            let request = ZapRequest {
                recipient,
                amount_msats,
                target,
                comment,
                related_event_id: event,
                relays: relay,
            };
            let prepared = orchestrator.prepare(&request).await?;
            match out {
                Some(path) => {
                    fs::write(&path, &prepared.invoice)?;
                    println!("PREPARED {path}");
                }
                None => println!("{}", prepared.invoice),
            }
        }
        Cmd::Ledger { cmd } => run_ledger(cmd)?,
        Cmd::Gateway { addr, graph } => {
            let scorer = build_scorer(graph.as_deref())?;
            let state = Arc::new(gateway::AppState {
                scorer,
                ledger: Mutex::new(Ledger::open()?),
            });
            gateway::run(&addr, state).await?;
        }
    }
    Ok(())
}

fn run_ledger(cmd: LedgerCmd) -> Result<()> {
    let mut ledger = Ledger::open()?;
    let guard = MintGuard::load();
    match cmd {
        LedgerCmd::Quote {
            mint,
            sats,
            purpose,
            invoice,
            ttl_mins,
            allow_untrusted,
        } => {
            let purpose = match purpose.as_str() {
                "deposit" => QuotePurpose::Deposit,
                "withdraw" => QuotePurpose::Withdraw,
                other => return Err(anyhow!("unknown purpose: {other}")),
            };
            if !guard.trusted(&mint) && !allow_untrusted {
                return Err(anyhow!(
                    "mint {mint} is not trusted; pass --allow-untrusted to proceed"
                ));
            }
            let quote = MintQuote::new(&mint, &invoice, sats, purpose, Duration::minutes(ttl_mins));
            let id = quote.quote_id.clone();
            ledger.record_pending_quote(quote)?;
            println!("QUOTED {id}");
        }
        LedgerCmd::Confirm { quote } => {
            let outcome = ledger.confirm_quote(&quote, Utc::now())?;
            println!("CONFIRM {outcome:?}");
        }
        LedgerCmd::Receive { mint, sats } => {
            let balance = ledger.receive_proofs(&guard, &mint, sats)?;
            println!("RECEIVED {sats} sat, balance {balance}");
        }
        LedgerCmd::Expire => {
            let removed = ledger.expire_stale(Utc::now())?;
            println!("EXPIRED {removed}");
        }
        LedgerCmd::Balance => {
            for (mint, sats) in ledger.balance_by_mint() {
                println!("{mint} {sats}");
            }
            println!("TOTAL {}", ledger.total_balance());
        }
        LedgerCmd::Mints => {
            for m in guard.records() {
                println!(
                    "{} {} {}",
                    m.url,
                    m.name,
                    if m.trusted { "trusted" } else { "untrusted" }
                );
            }
        }
    }
    Ok(())
}
