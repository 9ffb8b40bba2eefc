//! CLI struct definitions for the safe-harbor command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "safe-harbor",
    version = env!("CARGO_PKG_VERSION"),
    about = "Registry of Safe Harbor agreements: chain allow-list, agreement records, and adoptions with full history.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Store root holding harbor.db, the audit log, and harbor.toml.
    #[clap(long, global = true, env = "SAFE_HARBOR_STORE", default_value = ".safe-harbor")]
    pub store: PathBuf,
    /// Identity performing the operation.
    #[clap(long, global = true, env = "SAFE_HARBOR_CALLER")]
    pub caller: Option<String>,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Print the registry version.
    Version,
    /// Create the registry record. Fails if it already exists.
    Init {
        #[clap(long)]
        owner: String,
    },
    /// Manage the chain allow-list.
    Chains(ChainsCli),
    /// Manage the fallback registry pointer.
    Fallback(FallbackCli),
    /// Create and maintain agreements.
    Agreement(AgreementCli),
    /// Adopt an agreement as the caller.
    Adopt {
        agreement: String,
    },
    /// Show the agreement an adopter currently points at.
    Resolve {
        adopter: String,
    },
    /// Show an adopter's adoption history, newest first.
    History {
        adopter: String,
    },
    /// List adopters and their current agreements.
    Adopters {
        /// Only adopters currently pointing at this agreement.
        #[clap(long)]
        agreement: Option<String>,
    },
    /// List registry events in order.
    Events {
        /// Filter by event kind, e.g. `agreement_adopted`.
        #[clap(long)]
        kind: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub(crate) struct ChainsCli {
    #[clap(subcommand)]
    pub command: ChainsCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ChainsCommand {
    /// Allow-list chain ids (CAIP-2, e.g. `eip155:1`).
    Add {
        #[clap(required = true)]
        ids: Vec<String>,
    },
    /// Remove chain ids from the allow-list.
    Remove {
        #[clap(required = true)]
        ids: Vec<String>,
    },
    /// List allow-listed chain ids.
    List,
    /// Check whether one chain id is allow-listed.
    Check { id: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct FallbackCli {
    #[clap(subcommand)]
    pub command: FallbackCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FallbackCommand {
    /// Point at another registry, or clear the pointer with `--clear`.
    Set {
        #[clap(long, conflicts_with = "clear", required_unless_present = "clear")]
        registry: Option<String>,
        #[clap(long)]
        clear: bool,
    },
    /// Show the fallback registry pointer.
    Show,
}

#[derive(clap::Args, Debug)]
pub(crate) struct AgreementCli {
    #[clap(subcommand)]
    pub command: AgreementCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum AgreementCommand {
    /// Create an agreement from a JSON document.
    Create {
        /// Agreement document (protocolName, contact, chains, bountyTerms, agreementURI).
        #[clap(long)]
        file: PathBuf,
        /// Owner of the new agreement. Defaults to the caller.
        #[clap(long)]
        owner: Option<String>,
        /// Single fail-fast write instead of batched construction.
        #[clap(long)]
        direct: bool,
        /// Adopt the agreement as the caller once it exists.
        #[clap(long)]
        adopt: bool,
    },
    /// Submit whatever part of a document is not yet on an agreement.
    Resume {
        id: String,
        #[clap(long)]
        file: PathBuf,
    },
    /// Show one agreement.
    Show {
        id: String,
        /// Print in the camelCase document format.
        #[clap(long)]
        document: bool,
    },
    /// List agreements.
    List,
    SetName {
        id: String,
        name: String,
    },
    SetUri {
        id: String,
        uri: String,
    },
    /// Replace contacts from a JSON array of `{name, contact}`.
    SetContacts {
        id: String,
        #[clap(long)]
        file: PathBuf,
    },
    /// Replace bounty terms from a JSON `bountyTerms` object.
    SetBounty {
        id: String,
        #[clap(long)]
        file: PathBuf,
    },
    SetRecovery {
        id: String,
        #[clap(long)]
        chain: String,
        #[clap(long)]
        address: String,
    },
    /// Merge chains from a JSON array of chain documents.
    AddChains {
        id: String,
        #[clap(long)]
        file: PathBuf,
    },
    /// Replace existing chains from a JSON array of chain documents.
    SetChains {
        id: String,
        #[clap(long)]
        file: PathBuf,
    },
    RemoveChains {
        id: String,
        #[clap(required = true)]
        chains: Vec<String>,
    },
    /// Append accounts from a JSON array of account documents.
    AddAccounts {
        id: String,
        #[clap(long)]
        chain: String,
        #[clap(long)]
        file: PathBuf,
    },
    RemoveAccount {
        id: String,
        #[clap(long)]
        chain: String,
        #[clap(long)]
        account: String,
    },
    /// Hand the agreement to a new owner.
    Transfer {
        id: String,
        #[clap(long)]
        to: String,
    },
    /// Delete the agreement.
    Close { id: String },
}
