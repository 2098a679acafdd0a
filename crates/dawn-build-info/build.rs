//! Emits `VERGEN_GIT_SHA`, the only build-script output `lib.rs` reads.
//!
//! Resolution order: a packager-provided `DAWN_BUILD_SHA_SHORT`, then
//! best-effort git probing via vergen-gix, then the literal `unknown`.
//! Missing git data must never fail the build; `env!()` in `lib.rs` only
//! requires that the variable is always set to something.

use std::env;

use vergen_gix::{Emitter, GixBuilder};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    // Packagers and CI can hand over a SHA without any git checkout.
    println!("cargo:rerun-if-env-changed=DAWN_BUILD_SHA_SHORT");

    if let Some(sha) = packaged_sha() {
        set_sha(&sha);
        return;
    }

    let probed = GixBuilder::default()
        .sha(true) // short SHA
        .build()
        .map_err(|e| e.to_string())
        .and_then(|git| {
            Emitter::default()
                .add_instructions(&git)
                .and_then(|emitter| emitter.emit())
                .map_err(|e| e.to_string())
        });

    if let Err(err) = probed {
        println!("cargo:warning=dawn-build-info: git probe failed: {err}");
        set_sha("unknown");
    }
}

fn set_sha(sha: &str) {
    println!("cargo:rustc-env=VERGEN_GIT_SHA={sha}");
}

/// The first seven hex digits of the override, when it carries that much.
fn packaged_sha() -> Option<String> {
    let raw = env::var("DAWN_BUILD_SHA_SHORT").ok()?;
    let sha = raw.trim().get(..7)?.to_ascii_lowercase();
    if sha.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(sha)
    } else {
        None
    }
}
