//! CLI command implementations.
//!
//! Every command writes its output to the supplied writer so the same code
//! serves the binary and the tests.

use anyhow::{anyhow, bail, Context, Result};
use grove_storage::{
    refname::{HEAD, HEADS_PREFIX, REMOTES_PREFIX, TAGS_PREFIX},
    BackendKind, BranchKind, ObjectId, ObjectType, RefDb, RefTarget, Repository, StoreConfig,
};
use serde_json::json;
use std::io::{Read, Write};
use std::path::Path;

/// Store directory used when neither a config file nor `--store` names one.
pub const DEFAULT_STORE: &str = ".grove";

/// Builds the store configuration from an optional YAML file and an
/// optional store directory override.
pub fn load_config(config: Option<&Path>, store: Option<&Path>) -> Result<StoreConfig> {
    let mut config = match config {
        Some(path) => StoreConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StoreConfig::filesystem(DEFAULT_STORE),
    };
    if let Some(store) = store {
        if config.backend == BackendKind::Memory {
            config.backend = BackendKind::Filesystem;
        }
        config.path = Some(store.to_path_buf());
    }
    config.validate()?;
    Ok(config)
}

/// Opens the configured repository.
pub fn open(config: &StoreConfig) -> Result<Repository> {
    Repository::open(config).with_context(|| match &config.path {
        Some(path) => format!("opening store at {}", path.display()),
        None => "opening in-memory store".to_string(),
    })
}

pub fn print_line(out: &mut dyn Write, line: impl AsRef<str>) -> Result<()> {
    writeln!(out, "{}", line.as_ref())?;
    Ok(())
}

/// Initialize a store.
pub fn init(config: &StoreConfig, out: &mut dyn Write) -> Result<()> {
    tracing::info!(backend = ?config.backend, path = ?config.path, "Initializing store");

    let repo = open(config)?;
    let head = repo
        .refs()
        .head()?
        .ok_or_else(|| anyhow!("store has no HEAD after initialization"))?;

    let location = config
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "memory".to_string());
    print_line(out, format!("Initialized Grove store in {location}"))?;
    print_line(out, format!("HEAD -> {}", head.target()))
}

/// Compute (and optionally store) an object ID.
pub fn hash_object(
    repo: &Repository,
    file: Option<&Path>,
    object_type: &str,
    write: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let object_type = ObjectType::parse(object_type)?;
    let data = match file {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            let mut data = Vec::new();
            std::io::stdin().read_to_end(&mut data)?;
            data
        }
    };
    hash_bytes(repo, data, object_type, write, out)
}

pub fn hash_bytes(
    repo: &Repository,
    data: Vec<u8>,
    object_type: ObjectType,
    write: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let id = if write {
        repo.write(data, object_type)?
    } else {
        ObjectId::hash_object(object_type, &data)
    };
    print_line(out, id.to_hex())
}

/// What `cat-file` prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatMode {
    Type,
    Size,
    Pretty,
}

/// Show an object.
pub fn cat_file(repo: &Repository, rev: &str, mode: CatMode, out: &mut dyn Write) -> Result<()> {
    let id = resolve_object(repo, rev)?;
    match mode {
        CatMode::Type => print_line(out, repo.odb().read_header(&id)?.object_type.as_str()),
        CatMode::Size => print_line(out, repo.odb().read_header(&id)?.size.to_string()),
        CatMode::Pretty => {
            let object = repo.lookup(&id)?;
            match object.object_type {
                ObjectType::Tree => print_tree(&object.data, out),
                _ => {
                    out.write_all(&object.data)?;
                    Ok(())
                }
            }
        }
    }
}

fn print_tree(mut data: &[u8], out: &mut dyn Write) -> Result<()> {
    while !data.is_empty() {
        let nul = data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| anyhow!("truncated tree entry"))?;
        let entry = std::str::from_utf8(&data[..nul]).context("tree entry is not utf-8")?;
        let (mode, name) = entry
            .split_once(' ')
            .ok_or_else(|| anyhow!("malformed tree entry: {entry:?}"))?;
        let id_end = nul + 1 + ObjectId::LEN;
        if data.len() < id_end {
            bail!("truncated tree entry {name:?}");
        }
        let id = ObjectId::from_slice(&data[nul + 1..id_end])?;
        let kind = match mode {
            "40000" => ObjectType::Tree,
            "160000" => ObjectType::Commit,
            _ => ObjectType::Blob,
        };
        print_line(out, format!("{mode:0>6} {kind} {id}\t{name}"))?;
        data = &data[id_end..];
    }
    Ok(())
}

/// List references.
pub fn show_ref(
    repo: &Repository,
    pattern: Option<&str>,
    head: bool,
    dereference: bool,
    as_json: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let mut refs: Vec<_> = repo.refs().each(pattern)?.collect();
    if head {
        if let Some(head) = repo.refs().head()? {
            refs.insert(0, head);
        }
    }

    let mut rows = Vec::new();
    for reference in refs {
        let resolved = match repo.refs().resolve(&reference) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    name = %reference.name(),
                    error = %e,
                    "skipping unresolvable reference"
                );
                continue;
            }
        };
        let Some(id) = resolved.target_id() else {
            continue;
        };
        let peeled = if dereference && reference.is_tag() {
            repo.peel(&reference)?
        } else {
            None
        };
        rows.push((reference, id, peeled));
    }

    if as_json {
        let entries: Vec<_> = rows
            .iter()
            .map(|(reference, id, peeled)| {
                json!({
                    "name": reference.name(),
                    "id": id,
                    "symbolic": reference.symbolic_target(),
                    "peeled": peeled,
                })
            })
            .collect();
        return print_line(out, serde_json::to_string_pretty(&entries)?);
    }

    for (reference, id, peeled) in rows {
        print_line(out, format!("{id} {}", reference.name()))?;
        if let Some(peeled) = peeled {
            print_line(out, format!("{peeled} {}^{{}}", reference.name()))?;
        }
    }
    Ok(())
}

/// Create or move a reference.
pub fn update_ref(
    repo: &Repository,
    name: &str,
    target: &str,
    message: Option<&str>,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let id = resolve_object(repo, target)?;
    let refs = repo.refs();
    let reference = match refs.lookup(name)? {
        None => {
            let reference = refs.create(name, id, false)?;
            if message.is_some() {
                refs.log_append(name, None, message)?;
            }
            reference
        }
        // A forced write replaces any kind of reference; its log entry
        // carries no message.
        Some(_) if force => refs.create(name, id, true)?,
        Some(_) => {
            let committer = refs.default_signature()?;
            refs.update_with(name, id, &committer, message)?
        }
    };
    tracing::debug!(name = %reference.name(), target = %reference.target(), "updated ref");
    print_line(out, format!("{} {}", reference.target(), reference.name()))
}

/// Read or set a symbolic reference.
pub fn symbolic_ref(
    repo: &Repository,
    name: &str,
    target: Option<&str>,
    message: Option<&str>,
    out: &mut dyn Write,
) -> Result<()> {
    let refs = repo.refs();
    let Some(target) = target else {
        let reference = refs
            .lookup(name)?
            .ok_or_else(|| anyhow!("no such reference: {name}"))?;
        let target = reference
            .symbolic_target()
            .ok_or_else(|| anyhow!("{name} is not a symbolic reference"))?;
        return print_line(out, target);
    };

    let target = RefTarget::Symbolic(target.to_string());
    let reference = match refs.lookup(name)? {
        None => refs.create(name, target, false)?,
        Some(_) => {
            let committer = refs.default_signature()?;
            refs.update_with(name, target, &committer, message)?
        }
    };
    print_line(out, format!("{} -> {}", reference.name(), reference.target()))
}

/// Delete a reference.
pub fn delete_ref(repo: &Repository, name: &str, out: &mut dyn Write) -> Result<()> {
    repo.refs().delete(name)?;
    print_line(out, format!("Deleted {name}"))
}

/// Rename a reference.
pub fn rename_ref(
    repo: &Repository,
    old: &str,
    new: &str,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let reference = repo.refs().rename(old, new, force)?;
    print_line(out, format!("Renamed {old} to {}", reference.name()))
}

/// Show a reflog, newest entry first.
pub fn reflog(repo: &Repository, name: &str, as_json: bool, out: &mut dyn Write) -> Result<()> {
    let entries = repo.refs().log(name)?;

    if as_json {
        let entries: Vec<_> = entries
            .iter()
            .map(|entry| {
                json!({
                    "old": entry.id_old,
                    "new": entry.id_new,
                    "committer": entry.committer.to_string(),
                    "message": entry.message,
                })
            })
            .collect();
        return print_line(out, serde_json::to_string_pretty(&entries)?);
    }

    for (index, entry) in entries.iter().rev().enumerate() {
        let short = &entry.id_new.to_hex()[..7];
        let message = entry.message.as_deref().unwrap_or("");
        print_line(out, format!("{short} {name}@{{{index}}}: {message}"))?;
    }
    Ok(())
}

/// List tags.
pub fn tag_list(repo: &Repository, out: &mut dyn Write) -> Result<()> {
    for tag in repo.tags().each()? {
        print_line(out, tag.name())?;
    }
    Ok(())
}

/// Create a lightweight tag, or an annotated one when a message is given.
pub fn tag_create(
    repo: &Repository,
    name: &str,
    target: Option<&str>,
    message: Option<&str>,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let target = resolve_object(repo, target.unwrap_or(HEAD))?;
    let tag = match message {
        Some(message) => {
            let tagger = repo.refs().default_signature()?;
            let message = if message.ends_with('\n') {
                message.to_string()
            } else {
                format!("{message}\n")
            };
            repo.tags()
                .create_annotated(name, &target, &tagger, &message, force)?
        }
        None => repo.tags().create(name, &target, force)?,
    };
    print_line(out, format!("{} {}", tag.target_id()?, tag.canonical_name()))
}

/// Delete a tag.
pub fn tag_delete(repo: &Repository, name: &str, out: &mut dyn Write) -> Result<()> {
    let tag = repo
        .tags()
        .get(name)?
        .ok_or_else(|| anyhow!("tag '{name}' not found"))?;
    let id = tag.target_id()?;
    repo.tags().delete(&tag)?;
    print_line(out, format!("Deleted tag '{}' (was {})", tag.name(), &id.to_hex()[..7]))
}

/// List branches, marking the one HEAD is attached to.
pub fn branch_list(repo: &Repository, remotes: bool, out: &mut dyn Write) -> Result<()> {
    let kind = if remotes {
        BranchKind::Remote
    } else {
        BranchKind::Local
    };
    for branch in repo.branches().each(Some(kind))? {
        let marker = if branch.is_head()? { '*' } else { ' ' };
        print_line(out, format!("{marker} {}", branch.name()))?;
    }
    Ok(())
}

/// Create a branch.
pub fn branch_create(
    repo: &Repository,
    name: &str,
    start: Option<&str>,
    force: bool,
    out: &mut dyn Write,
) -> Result<()> {
    let start = resolve_object(repo, start.unwrap_or(HEAD))?;
    let branch = repo.branches().create(name, &start, force)?;
    print_line(out, format!("{} {}", start, branch.canonical_name()))
}

/// Delete a branch.
pub fn branch_delete(repo: &Repository, name: &str, out: &mut dyn Write) -> Result<()> {
    let branch = repo
        .branches()
        .get(name)?
        .ok_or_else(|| anyhow!("branch '{name}' not found"))?;
    if branch.is_head()? {
        bail!("cannot delete branch '{name}': HEAD is attached to it");
    }
    let id = branch.tip()?;
    repo.branches().delete(&branch)?;
    print_line(out, format!("Deleted branch {} (was {})", branch.name(), &id.to_hex()[..7]))
}

/// Resolve and peel a reference.
pub fn peel(repo: &Repository, name: &str, out: &mut dyn Write) -> Result<()> {
    let reference = lookup_ref(repo.refs(), name)?
        .ok_or_else(|| anyhow!("no such reference: {name}"))?;
    match repo.peel(&reference)? {
        Some(id) => print_line(out, id.to_hex()),
        None => print_line(
            out,
            format!("{} (already peeled)", reference.target()),
        ),
    }
}

/// Resolves a full ID or a reference name, trying `refs/tags/`,
/// `refs/heads/` and `refs/remotes/` for short names.
pub fn resolve_object(repo: &Repository, rev: &str) -> Result<ObjectId> {
    if ObjectId::is_hex(rev) {
        return Ok(ObjectId::from_hex(rev)?);
    }
    let reference = lookup_ref(repo.refs(), rev)?
        .ok_or_else(|| anyhow!("not an object ID or reference: {rev}"))?;
    let resolved = repo.refs().resolve(&reference)?;
    resolved
        .target_id()
        .ok_or_else(|| anyhow!("{rev} does not resolve to an object"))
}

fn lookup_ref(refs: &RefDb, rev: &str) -> Result<Option<grove_storage::Reference>> {
    let candidates = [
        rev.to_string(),
        format!("{TAGS_PREFIX}{rev}"),
        format!("{HEADS_PREFIX}{rev}"),
        format!("{REMOTES_PREFIX}{rev}"),
    ];
    for candidate in candidates.iter().filter(|c| RefDb::valid_name(c)) {
        if let Some(reference) = refs.lookup(candidate)? {
            return Ok(Some(reference));
        }
    }
    Ok(None)
}
