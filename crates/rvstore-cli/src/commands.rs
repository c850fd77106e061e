use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::{json, Value};
use tracing::debug;

use rvstore_dualwrite::{DualWriter, DualWriterConfig, Mode, ReconcileLog};
use rvstore_file::FileStore;
use rvstore_storage::{codec, ListOptions, Preconditions, Storage, StorageResult, WatchOptions};
use rvstore_types::{
    FieldSelector, LabelSelector, ObjectKey, Predicate, Resource, ResourceKind, ResourceVersion,
    WatchEvent,
};

use crate::cli::*;
use crate::config::CliConfig;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    if let Some(root) = cli.root {
        config.store.root = root;
    }
    if let Some(root) = cli.legacy_root {
        config.legacy_root = Some(root);
    }
    let stores = Stores::open(config, cli.mode)?;
    let out = Printer { format: cli.format };

    let result = match cli.command {
        Command::Create(args) => cmd_create(&stores, &out, args).await,
        Command::Get(args) => cmd_get(&stores, &out, args).await,
        Command::List(args) => cmd_list(&stores, &out, args).await,
        Command::Update(args) => cmd_update(&stores, &out, args).await,
        Command::Delete(args) => cmd_delete(&stores, &out, args).await,
        Command::Watch(args) => cmd_watch(&stores, &out, args).await,
        Command::Rv => cmd_rv(&stores, &out),
    };
    stores.report();
    result
}

/// The store directory plus, with a legacy root, the pieces of a dual writer.
struct Stores {
    main: Arc<FileStore>,
    legacy: Option<Arc<FileStore>>,
    dualwrite: DualWriterConfig,
    mode: Option<Mode>,
    log: Arc<ReconcileLog>,
}

impl Stores {
    fn open(config: CliConfig, mode: Option<Mode>) -> anyhow::Result<Self> {
        let legacy = match config.legacy_store() {
            Some(cfg) => {
                let root = cfg.root.clone();
                let store = FileStore::open(cfg)
                    .with_context(|| format!("opening legacy store {}", root.display()))?;
                Some(Arc::new(store))
            }
            None => None,
        };
        let root = config.store.root.clone();
        let main = FileStore::open(config.store)
            .with_context(|| format!("opening store {}", root.display()))?;
        debug!(root = %root.display(), dual = legacy.is_some(), "stores opened");
        Ok(Self {
            main: Arc::new(main),
            legacy,
            log: Arc::new(ReconcileLog::new(config.dualwrite.reconcile_capacity)),
            dualwrite: config.dualwrite,
            mode,
        })
    }

    fn for_kind(&self, kind: &ResourceKind) -> Arc<dyn Storage> {
        let Some(legacy) = &self.legacy else {
            return Arc::clone(&self.main) as Arc<dyn Storage>;
        };
        let legacy = Arc::clone(legacy) as Arc<dyn Storage>;
        let unified = Arc::clone(&self.main) as Arc<dyn Storage>;
        let writer = match self.mode {
            Some(mode) => DualWriter::new(mode, legacy, unified, Arc::clone(&self.log)),
            None => DualWriter::for_kind(&self.dualwrite, kind, legacy, unified, Arc::clone(&self.log)),
        };
        Arc::new(writer)
    }

    /// Surface shadow-store failures the dual writer swallowed.
    fn report(&self) {
        for entry in self.log.drain() {
            eprintln!(
                "{} {} {}: {}",
                "reconcile:".yellow().bold(),
                entry.operation,
                entry.key,
                entry.error
            );
        }
        let stats = self.log.stats();
        if stats.drift_detected > 0 {
            eprintln!(
                "{} legacy and new stores differ ({} objects)",
                "drift:".yellow().bold(),
                stats.drift_detected
            );
        }
    }
}

struct Printer {
    format: OutputFormat,
}

impl Printer {
    fn object(&self, verb: &str, obj: &Resource) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&codec::to_value(obj)?)?),
            OutputFormat::Text => {
                if !verb.is_empty() {
                    println!("{} {}", "✓".green().bold(), verb);
                }
                self.summary(obj);
                if !obj.labels().is_empty() {
                    let labels: Vec<String> =
                        obj.labels().iter().map(|(k, v)| format!("{k}={v}")).collect();
                    println!("  labels: {}", labels.join(",").blue());
                }
                if !obj.body.is_null() {
                    for line in serde_json::to_string_pretty(&obj.body)?.lines() {
                        println!("  {line}");
                    }
                }
            }
        }
        Ok(())
    }

    fn summary(&self, obj: &Resource) {
        let name = match obj.namespace() {
            Some(ns) => format!("{ns}/{}", obj.name()),
            None => obj.name().to_string(),
        };
        println!(
            "{} {}  rv {}  uid {}",
            obj.kind.group_resource().cyan(),
            name.bold(),
            obj.resource_version().to_string().yellow(),
            obj.uid().dimmed()
        );
    }

    fn list(&self, items: &[Resource], rv: ResourceVersion) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => {
                let items = items
                    .iter()
                    .map(codec::to_value)
                    .collect::<StorageResult<Vec<Value>>>()?;
                let doc = json!({ "resourceVersion": rv.to_string(), "items": items });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            }
            OutputFormat::Text => {
                for obj in items {
                    self.summary(obj);
                }
                println!("{} objects at rv {}", items.len().to_string().bold(), rv.to_string().yellow());
            }
        }
        Ok(())
    }

    fn event(&self, event: &WatchEvent) -> anyhow::Result<()> {
        let kind = event.event_type().to_string();
        match (self.format, event) {
            (OutputFormat::Json, WatchEvent::Error(status)) => {
                println!("{}", json!({ "type": kind, "status": status }));
            }
            (OutputFormat::Json, _) => {
                let object = match event.object() {
                    Some(obj) => codec::to_value(obj)?,
                    None => Value::Null,
                };
                println!("{}", json!({ "type": kind, "object": object }));
            }
            (OutputFormat::Text, WatchEvent::Error(status)) => {
                println!("{} {}", kind.red().bold(), status);
            }
            (OutputFormat::Text, WatchEvent::Bookmark(obj)) => {
                println!("{} rv {}", kind.dimmed(), obj.resource_version().to_string().yellow());
            }
            (OutputFormat::Text, _) => {
                let label = match event {
                    WatchEvent::Added(_) => kind.green(),
                    WatchEvent::Deleted(_) => kind.red(),
                    _ => kind.blue(),
                };
                print!("{label:<9} ");
                if let Some(obj) = event.object() {
                    self.summary(obj);
                }
            }
        }
        Ok(())
    }
}

/// `group/version/resource`, or `version/resource` for the core group.
fn parse_kind(s: &str) -> anyhow::Result<ResourceKind> {
    let parts: Vec<&str> = s.split('/').collect();
    let kind = match parts.as_slice() {
        [group, version, resource] => ResourceKind::new(*group, *version, *resource),
        [version, resource] => ResourceKind::new("", *version, *resource),
        _ => bail!("kind must be group/version/resource or version/resource, got {s:?}"),
    };
    if kind.version.is_empty() || kind.resource.is_empty() {
        bail!("kind {s:?} has an empty version or resource");
    }
    Ok(kind)
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum LabelEdit {
    Set(String, String),
    Remove(String),
}

fn parse_label(s: &str) -> anyhow::Result<LabelEdit> {
    if let Some((key, value)) = s.split_once('=') {
        if key.is_empty() {
            bail!("label {s:?} has an empty key");
        }
        return Ok(LabelEdit::Set(key.to_string(), value.to_string()));
    }
    match s.strip_suffix('-') {
        Some(key) if !key.is_empty() => Ok(LabelEdit::Remove(key.to_string())),
        _ => bail!("label must be key=value or key-, got {s:?}"),
    }
}

fn parse_body(s: &str) -> anyhow::Result<Value> {
    serde_json::from_str(s).context("--body is not valid JSON")
}

fn parse_version(s: &str) -> anyhow::Result<ResourceVersion> {
    ResourceVersion::parse(s).with_context(|| format!("bad resource version {s:?}"))
}

fn preconditions(if_version: Option<&str>) -> anyhow::Result<Preconditions> {
    Ok(match if_version {
        Some(v) => Preconditions::resource_version(parse_version(v)?),
        None => Preconditions::none(),
    })
}

fn object_key(args: &ObjectArgs) -> anyhow::Result<ObjectKey> {
    Ok(ObjectKey::new(
        parse_kind(&args.kind)?,
        args.namespace.clone(),
        args.name.clone(),
    ))
}

fn predicate(args: &ListArgs) -> anyhow::Result<Predicate> {
    let mut predicate = match &args.namespace {
        Some(ns) => Predicate::in_namespace(ns.clone()),
        None => Predicate::everything(),
    };
    if let Some(s) = &args.selector {
        predicate = predicate.with_labels(LabelSelector::parse(s)?);
    }
    if let Some(s) = &args.field_selector {
        predicate = predicate.with_fields(FieldSelector::parse(s)?);
    }
    Ok(predicate)
}

async fn cmd_create(stores: &Stores, out: &Printer, args: CreateArgs) -> anyhow::Result<()> {
    let key = object_key(&args.object)?;
    let mut obj = Resource::new(
        key.kind.clone(),
        key.namespace.as_deref(),
        &key.name,
        parse_body(&args.body)?,
    );
    for label in &args.labels {
        match parse_label(label)? {
            LabelEdit::Set(k, v) => obj = obj.with_label(k, v),
            LabelEdit::Remove(_) => bail!("create takes key=value labels only, got {label:?}"),
        }
    }
    let created = stores.for_kind(&key.kind).create(obj).await?;
    out.object("created", &created)
}

async fn cmd_get(stores: &Stores, out: &Printer, args: ObjectArgs) -> anyhow::Result<()> {
    let key = object_key(&args)?;
    let obj = stores.for_kind(&key.kind).get(&key).await?;
    out.object("", &obj)
}

async fn cmd_list(stores: &Stores, out: &Printer, args: ListArgs) -> anyhow::Result<()> {
    let kind = parse_kind(&args.kind)?;
    let opts = ListOptions::new(kind.clone()).with_predicate(predicate(&args)?);
    let listed = stores.for_kind(&kind).list(&opts).await?;
    out.list(&listed.items, listed.resource_version)
}

async fn cmd_update(stores: &Stores, out: &Printer, args: UpdateArgs) -> anyhow::Result<()> {
    let key = object_key(&args.object)?;
    let pre = preconditions(args.if_version.as_deref())?;
    let body = args.body.as_deref().map(parse_body).transpose()?;
    let edits = args
        .labels
        .iter()
        .map(|l| parse_label(l))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut apply = |mut obj: Resource| -> StorageResult<Resource> {
        if let Some(body) = &body {
            obj.body = body.clone();
        }
        for edit in &edits {
            match edit {
                LabelEdit::Set(k, v) => {
                    obj.metadata.labels.insert(k.clone(), v.clone());
                }
                LabelEdit::Remove(k) => {
                    obj.metadata.labels.remove(k);
                }
            }
        }
        Ok(obj)
    };
    let updated = stores
        .for_kind(&key.kind)
        .guaranteed_update(&key, &pre, args.upsert, &mut apply)
        .await?;
    out.object("updated", &updated)
}

async fn cmd_delete(stores: &Stores, out: &Printer, args: DeleteArgs) -> anyhow::Result<()> {
    let key = object_key(&args.object)?;
    let pre = preconditions(args.if_version.as_deref())?;
    let gone = stores.for_kind(&key.kind).delete(&key, &pre).await?;
    out.object("deleted", &gone)
}

async fn cmd_watch(stores: &Stores, out: &Printer, args: WatchArgs) -> anyhow::Result<()> {
    let kind = parse_kind(&args.list.kind)?;
    let from = match args.from.as_deref() {
        Some(v) => parse_version(v)?,
        None => ResourceVersion::ZERO,
    };
    let mut opts = WatchOptions::new(kind.clone())
        .with_predicate(predicate(&args.list)?)
        .from_version(from);
    if args.bookmarks {
        opts = opts.with_bookmarks();
    }

    let storage = stores.for_kind(&kind);
    let mut stream = storage.watch(opts).await?;
    let mut seen = 0usize;
    let result = loop {
        if args.limit.is_some_and(|limit| seen >= limit) {
            break Ok(());
        }
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = stream.recv() => event,
        };
        let Some(event) = event else {
            break Ok(());
        };
        out.event(&event)?;
        if let WatchEvent::Error(status) = event {
            break Err(anyhow::anyhow!("watch ended: {status}"));
        }
        seen += 1;
    };
    stream.stop();
    result
}

fn cmd_rv(stores: &Stores, out: &Printer) -> anyhow::Result<()> {
    let main = stores.main.current_resource_version();
    let legacy = stores.legacy.as_ref().map(|s| s.current_resource_version());
    match out.format {
        OutputFormat::Json => {
            let doc = json!({
                "resourceVersion": main.to_string(),
                "legacyResourceVersion": legacy.map(|rv| rv.to_string()),
            });
            println!("{doc}");
        }
        OutputFormat::Text => {
            println!("{} {}", "rv".bold(), main.to_string().yellow());
            if let Some(rv) = legacy {
                println!("{} {}", "legacy rv".bold(), rv.to_string().yellow());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rvstore_file::FileStoreConfig;

    async fn run(args: &[&str]) -> anyhow::Result<()> {
        let mut argv = vec!["rvstore"];
        argv.extend_from_slice(args);
        run_command(Cli::try_parse_from(argv).unwrap()).await
    }

    fn reopen(root: &std::path::Path) -> FileStore {
        FileStore::open(FileStoreConfig::new(root)).unwrap()
    }

    #[test]
    fn kinds() {
        assert_eq!(
            parse_kind("dashboard.grafana.app/v1/dashboards").unwrap(),
            ResourceKind::new("dashboard.grafana.app", "v1", "dashboards")
        );
        assert_eq!(parse_kind("v1/configmaps").unwrap(), ResourceKind::new("", "v1", "configmaps"));
        assert!(parse_kind("configmaps").is_err());
        assert!(parse_kind("a/b/c/d").is_err());
        assert!(parse_kind("g//r").is_err());
    }

    #[test]
    fn labels() {
        assert_eq!(parse_label("a=1").unwrap(), LabelEdit::Set("a".into(), "1".into()));
        assert_eq!(parse_label("a=").unwrap(), LabelEdit::Set("a".into(), String::new()));
        assert_eq!(parse_label("tier-").unwrap(), LabelEdit::Remove("tier".into()));
        assert!(parse_label("=1").is_err());
        assert!(parse_label("-").is_err());
        assert!(parse_label("plain").is_err());
    }

    #[test]
    fn if_version() {
        assert_eq!(preconditions(None).unwrap(), Preconditions::none());
        assert_eq!(
            preconditions(Some("42")).unwrap(),
            Preconditions::resource_version(ResourceVersion::new(42))
        );
        assert!(preconditions(Some("abc")).is_err());
    }

    #[tokio::test]
    async fn create_update_delete_round() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();

        run(&["--root", root, "create", "v1/configmaps", "cfg", "-n", "default", "-l", "tier=web", "--body", r#"{"k":"v"}"#])
            .await
            .unwrap();
        let err = run(&["--root", root, "create", "v1/configmaps", "cfg", "-n", "default"]).await.unwrap_err();
        assert!(format!("{err:#}").contains("already exists"), "{err:#}");

        run(&["--root", root, "update", "v1/configmaps", "cfg", "-n", "default", "-l", "tier-", "-l", "env=prod"])
            .await
            .unwrap();
        {
            let store = reopen(dir.path());
            let key = ObjectKey::namespaced(ResourceKind::new("", "v1", "configmaps"), "default", "cfg");
            let obj = store.get(&key).await.unwrap();
            assert_eq!(obj.body, json!({"k": "v"}));
            assert_eq!(obj.labels().get("env").map(String::as_str), Some("prod"));
            assert!(!obj.labels().contains_key("tier"));
        }

        let stale = run(&["--root", root, "delete", "v1/configmaps", "cfg", "-n", "default", "--if-version", "1"]).await;
        assert!(stale.is_err());
        run(&["--root", root, "delete", "v1/configmaps", "cfg", "-n", "default"]).await.unwrap();
        assert!(run(&["--root", root, "get", "v1/configmaps", "cfg", "-n", "default"]).await.is_err());
    }

    #[tokio::test]
    async fn upsert_creates() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        assert!(run(&["--root", root, "update", "g/v1/things", "t"]).await.is_err());
        run(&["--root", root, "update", "g/v1/things", "t", "--upsert", "--body", "[1]"]).await.unwrap();

        let store = reopen(dir.path());
        let obj = store.get(&ObjectKey::cluster(ResourceKind::new("g", "v1", "things"), "t")).await.unwrap();
        assert_eq!(obj.body, json!([1]));
    }

    #[tokio::test]
    async fn list_and_bounded_watch() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        for name in ["a", "b"] {
            run(&["--root", root, "create", "g/v1/things", name, "-n", "ns"]).await.unwrap();
        }
        run(&["--root", root, "--format", "json", "list", "g/v1/things", "-n", "ns"]).await.unwrap();
        run(&["--root", root, "watch", "g/v1/things", "--limit", "2"]).await.unwrap();
        assert!(run(&["--root", root, "list", "g/v1/things", "-l", "a in ("]).await.is_err());
    }

    #[tokio::test]
    async fn dual_legacy_mirrors_into_the_new_store() {
        let new_dir = tempfile::tempdir().unwrap();
        let old_dir = tempfile::tempdir().unwrap();
        let (new_root, old_root) = (new_dir.path().to_str().unwrap(), old_dir.path().to_str().unwrap());

        run(&["--root", new_root, "--legacy-root", old_root, "--mode", "2", "create", "g/v1/things", "t", "--body", "{}"])
            .await
            .unwrap();
        run(&["--root", new_root, "--legacy-root", old_root, "rv"]).await.unwrap();

        let key = ObjectKey::cluster(ResourceKind::new("g", "v1", "things"), "t");
        let legacy = reopen(old_dir.path()).get(&key).await.unwrap();
        let mirrored = reopen(new_dir.path()).get(&key).await.unwrap();
        assert_eq!(legacy.uid(), mirrored.uid());
    }

    #[tokio::test]
    async fn legacy_mode_leaves_the_new_store_alone() {
        let new_dir = tempfile::tempdir().unwrap();
        let old_dir = tempfile::tempdir().unwrap();
        let (new_root, old_root) = (new_dir.path().to_str().unwrap(), old_dir.path().to_str().unwrap());

        run(&["--root", new_root, "--legacy-root", old_root, "create", "g/v1/things", "t"]).await.unwrap();
        let key = ObjectKey::cluster(ResourceKind::new("g", "v1", "things"), "t");
        assert!(reopen(old_dir.path()).get(&key).await.is_ok());
        assert!(reopen(new_dir.path()).get(&key).await.unwrap_err().is_not_found());
    }
}
