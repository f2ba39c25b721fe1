//! Fuzz target for reference database operation sequences.
//!
//! Applies arbitrary create/update/rename/delete sequences to an in-memory
//! repository and checks that resolution always terminates with a direct
//! reference, a dangling target, or a cycle.

#![no_main]

use arbitrary::Arbitrary;
use grove_storage::{ObjectType, Repository, StorageError};
use libfuzzer_sys::fuzz_target;

const NAMES: &[&str] = &[
    "HEAD",
    "refs/heads/main",
    "refs/heads/dev",
    "refs/heads/dev/topic",
    "refs/tags/v1",
    "refs/remotes/origin/main",
];

#[derive(Debug, Arbitrary)]
enum Op {
    CreateDirect { name: u8, object: u8, force: bool },
    CreateSymbolic { name: u8, target: u8, force: bool },
    Update { name: u8, object: u8 },
    Rename { from: u8, to: u8, force: bool },
    Delete { name: u8 },
}

fn name(index: u8) -> &'static str {
    NAMES[index as usize % NAMES.len()]
}

fuzz_target!(|ops: Vec<Op>| {
    let repo = Repository::in_memory();
    let objects: Vec<_> = (0u8..4)
        .map(|i| repo.write(vec![i], ObjectType::Blob).expect("memory write"))
        .collect();
    let object = |i: u8| objects[i as usize % objects.len()];
    let refs = repo.refs();

    for op in ops.into_iter().take(64) {
        let _ = match op {
            Op::CreateDirect { name: n, object: o, force } => {
                refs.create(name(n), object(o), force).map(drop)
            }
            Op::CreateSymbolic { name: n, target, force } => {
                refs.create(name(n), name(target), force).map(drop)
            }
            Op::Update { name: n, object: o } => refs.update(name(n), object(o)).map(drop),
            Op::Rename { from, to, force } => refs.rename(name(from), name(to), force).map(drop),
            Op::Delete { name: n } => refs.delete(name(n)),
        };

        for reference in refs.each(None).expect("memory iterate") {
            match refs.resolve(&reference) {
                Ok(resolved) => assert!(resolved.target_id().is_some()),
                Err(StorageError::RefNotFound(_)) | Err(StorageError::CyclicReference(_)) => {}
                Err(e) => panic!("unexpected resolve error: {e}"),
            }
        }
    }
});
