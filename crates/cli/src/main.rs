use std::str::FromStr;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use gwpolicy_core::{GroupKind, PolicyError, ResourceStore, POLICY_LABEL_KEY};
use gwpolicy_engine::PolicyManager;
use gwpolicy_resolve::{ObjectKind, ResolveCtx};
use serde::Serialize;
use tracing::info;

mod render;

#[derive(Parser, Debug)]
#[command(name = "gwpolicyctl", version, about = "Inspect Gateway API policies and their effective merge")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to look in
    #[arg(short = 'n', long = "namespace", global = true, default_value = "default")]
    namespace: String,

    /// Look across all namespaces
    #[arg(short = 'A', long = "all-namespaces", global = true, action = ArgAction::SetTrue)]
    all_namespaces: bool,

    /// Label key marking a CRD as a policy kind
    #[arg(long = "policy-label", env = "GWPOLICY_POLICY_LABEL", global = true, default_value = POLICY_LABEL_KEY)]
    policy_label: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json, Yaml }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List policies, policy kinds or HTTPRoutes
    Get {
        #[arg(value_enum)]
        resource: GetResource,
    },
    /// Show an object with its directly attached and effective policies
    Describe {
        #[arg(value_enum)]
        resource: DescribeResource,
        /// Object name; backends take `[type/]name` (type defaults to service)
        name: Option<String>,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum GetResource {
    #[value(alias = "policy")]
    Policies,
    #[value(alias = "policycrd")]
    Policycrds,
    #[value(alias = "httproute")]
    Httproutes,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum DescribeResource {
    #[value(alias = "policy")]
    Policies,
    #[value(alias = "gatewayclass")]
    Gatewayclasses,
    #[value(alias = "gateway")]
    Gateways,
    #[value(alias = "httproute")]
    Httproutes,
    #[value(alias = "namespace")]
    Namespaces,
    #[value(alias = "backend")]
    Backends,
}

fn init_tracing() {
    let env = std::env::var("GWPOLICY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("GWPOLICY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid GWPOLICY_METRICS_ADDR; expected host:port");
        }
    }
}

fn emit<T: Serialize>(output: Output, items: &[T], human: impl FnOnce() -> String) -> Result<()> {
    match output {
        Output::Human => println!("{}", human()),
        Output::Json => println!("{}", serde_json::to_string_pretty(items)?),
        Output::Yaml => print!("{}", serde_yaml::to_string(items)?),
    }
    Ok(())
}

/// Describe documents print as one YAML block per object in human mode.
fn emit_described<T: Serialize>(output: Output, items: &[T]) -> Result<()> {
    if output != Output::Human {
        return emit(output, items, String::new);
    }
    let blocks: Vec<String> = items.iter().map(serde_yaml::to_string).collect::<Result<_, _>>()?;
    print!("{}", blocks.join("\n"));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = if cli.all_namespaces { None } else { Some(cli.namespace.as_str()) };

    let backend = match &cli.command {
        Commands::Describe { resource: DescribeResource::Backends, name } => {
            Some(name.as_deref().map(render::parse_backend).unwrap_or((GroupKind::service(), String::new())))
        }
        _ => None,
    };
    let extra: Vec<GroupKind> = backend.iter().map(|(gk, _)| gk.clone()).collect();

    let client = gwpolicy_kubehub::get_kube_client().await?;
    let store = gwpolicy_kubehub::load_snapshot(client, &cli.policy_label, &extra).await?;
    let pm = PolicyManager::init(&store, &cli.policy_label)?;
    for w in pm.warnings() {
        eprintln!("warning: {}", w);
    }
    let ctx = ResolveCtx::new(&store, &pm);

    match cli.command {
        Commands::Get { resource } => {
            info!(resource = ?resource, ns = ?ns, "get invoked");
            match resource {
                GetResource::Policies => {
                    let rows = render::policy_rows(&pm, ns);
                    emit(cli.output, &rows, || {
                        let cells: Vec<Vec<String>> = rows
                            .iter()
                            .map(|r| vec![r.name.clone(), r.kind.clone(), r.target_name.clone(), r.target_kind.clone(), r.policy_type.to_string()])
                            .collect();
                        render::table(&["NAME", "KIND", "TARGET NAME", "TARGET KIND", "POLICY TYPE"], &cells)
                    })?;
                }
                GetResource::Policycrds => {
                    let rows = render::policy_crd_rows(pm.registry());
                    emit(cli.output, &rows, || {
                        let cells: Vec<Vec<String>> = rows
                            .iter()
                            .map(|r| vec![r.name.clone(), r.group.clone(), r.kind.clone(), r.policy_type.to_string(), r.scope.to_string()])
                            .collect();
                        render::table(&["NAME", "GROUP", "KIND", "POLICY TYPE", "SCOPE"], &cells)
                    })?;
                }
                GetResource::Httproutes => {
                    let rows = render::http_route_rows(&store, ns, chrono::Utc::now())?;
                    emit(cli.output, &rows, || {
                        let cells: Vec<Vec<String>> = rows
                            .iter()
                            .map(|r| {
                                let hosts = if r.hostnames.is_empty() { "None".to_string() } else { r.hostnames.join(",") };
                                vec![r.namespace.clone(), r.name.clone(), hosts, r.parent_refs.to_string(), r.age.clone()]
                            })
                            .collect();
                        render::table(&["NAMESPACE", "NAME", "HOSTNAMES", "PARENT REFS", "AGE"], &cells)
                    })?;
                }
            }
        }
        Commands::Describe { resource, name } => {
            info!(resource = ?resource, name = ?name, ns = ?ns, "describe invoked");
            let (kind, name) = match resource {
                DescribeResource::Policies => {
                    let docs: Vec<_> = pm
                        .policies_in(ns)
                        .into_iter()
                        .filter(|p| name.as_deref().map_or(true, |n| p.reference().name == n))
                        .map(render::describe_policy)
                        .collect();
                    if let (true, Some(n)) = (docs.is_empty(), &name) {
                        anyhow::bail!("no policy named {} in {}", n, ns.unwrap_or("any namespace"));
                    }
                    return emit_described(cli.output, &docs);
                }
                DescribeResource::Gatewayclasses => (ObjectKind::GatewayClass, name),
                DescribeResource::Gateways => (ObjectKind::Gateway, name),
                DescribeResource::Httproutes => (ObjectKind::HttpRoute, name),
                DescribeResource::Namespaces => (ObjectKind::Namespace, name),
                DescribeResource::Backends => {
                    let (gk, n) = backend.unwrap_or((GroupKind::service(), String::new()));
                    (render::backend_kind(&store, gk), Some(n).filter(|n| !n.is_empty()))
                }
            };
            let list_ns = if kind.namespaced() { ns } else { None };
            let objs: Vec<_> = match &name {
                Some(n) => {
                    let obj_ns = if kind.namespaced() { cli.namespace.as_str() } else { "" };
                    let obj = store.get_object(&kind.group_kind(), obj_ns, n)?.ok_or_else(|| PolicyError::NotFound {
                        kind: kind.group_kind(),
                        namespace: obj_ns.to_string(),
                        name: n.clone(),
                    })?;
                    vec![obj]
                }
                None => store.list_objects(&kind.group_kind(), list_ns)?,
            };
            let docs = objs.iter().map(|o| render::describe_object(&ctx, &kind, o)).collect::<Result<Vec<_>>>()?;
            emit_described(cli.output, &docs)?;
        }
    }

    Ok(())
}
