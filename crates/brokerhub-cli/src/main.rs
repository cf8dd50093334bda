//! brokerhub demo binary.
//!
//! Loads an optional chaos policy file, registers a couple of in-process
//! services, opens a full-access view, exercises one of them, and prints
//! the container's diagnostics JSON (§6) to stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use brokerhub_core::contracts::{DynError, Factory, RequestOptions, RpcDescriptor, ServiceObject};
use brokerhub_core::entry::{FactoryKind, InProcessFactoryEntry};
use brokerhub_core::registration::Registration;
use brokerhub_core::{Container, View};
use brokerhub_proto::{Audience, Identity, Version};
use clap::Parser;
use tokio_util::sync::CancellationToken;

/// brokerhub demo CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "brokerhub")]
#[command(about = "Demo host for the brokerhub brokered-service container")]
struct Args {
	/// Path to a chaos policy JSON file (§4.7), applied before dispatch.
	#[arg(long, value_name = "PATH")]
	chaos_policy: Option<PathBuf>,

	/// Verbose logging.
	#[arg(short, long)]
	verbose: bool,
}

struct CalcDescriptor(Identity);

impl RpcDescriptor for CalcDescriptor {
	fn identity(&self) -> &Identity {
		&self.0
	}
}

/// A trivial in-process service returning an incrementing counter, standing
/// in for a real typed service behind the `RpcDescriptor`/`Factory` seam.
struct CalcFactory {
	calls: AtomicU64,
}

#[async_trait]
impl Factory for CalcFactory {
	async fn create(
		&self,
		identity: &Identity,
		_options: &RequestOptions,
		_broker: Arc<View>,
		_cancel: &CancellationToken,
	) -> Result<Option<ServiceObject>, DynError> {
		let call_count = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
		tracing::info!(%identity, call_count, "Calc factory invoked");
		Ok(Some(Arc::new(call_count) as ServiceObject))
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();
	setup_tracing(args.verbose);

	let container = Container::builder().build();

	let calc = Identity::versioned("Calc", Version::new(1, 0, 0));
	container.register_services([(
		calc.clone(),
		Registration {
			audience: Audience::PROCESS | Audience::SAME_MACHINE,
			proffering_host_id: None,
			allow_guest_clients: true,
			extra_interface_names: Vec::new(),
		},
	)]);
	let calc_entry = Arc::new(InProcessFactoryEntry::new(
		FactoryKind::Plain(Arc::new(CalcFactory { calls: AtomicU64::new(0) })),
		Arc::new(CalcDescriptor(calc.clone())),
		Arc::new(Registration {
			audience: Audience::PROCESS | Audience::SAME_MACHINE,
			proffering_host_id: None,
			allow_guest_clients: true,
			extra_interface_names: Vec::new(),
		}),
		Arc::downgrade(&container),
	));
	let _calc_handle = container.proffer(calc_entry)?;

	if let Some(path) = &args.chaos_policy {
		container.apply_chaos_policy(path)?;
		tracing::info!(path = %path.display(), "chaos policy applied");
	}

	let view = container.get_full_access_view();
	let cancel = CancellationToken::new();
	match view.get_proxy(&calc, RequestOptions::default(), &cancel).await {
		Ok(Some(_service)) => tracing::info!("Calc resolved"),
		Ok(None) => tracing::warn!("Calc did not resolve"),
		Err(error) => tracing::error!(%error, "Calc dispatch failed"),
	}

	let diagnostics = container.diagnostics(view.audience());
	serde_json::to_writer_pretty(std::io::stdout(), &diagnostics)?;
	println!();

	Ok(())
}

fn setup_tracing(verbose: bool) {
	use tracing_subscriber::EnvFilter;

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("brokerhub=trace,debug")
		} else {
			EnvFilter::new("brokerhub=info")
		}
	});

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
