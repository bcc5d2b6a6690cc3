//! Fault-injection tests: unavailable storage, corrupt documents, and
//! dirty-flag behavior around failed saves.

use std::fs;
use std::path::Path;

use prefstore::{Error, PrefsContext, RootKind, ScopeMap};

fn ctx_at(dir: &Path, user: &str) -> PrefsContext {
    PrefsContext::new(ScopeMap::new(), ScopeMap::new())
        .with_store_path(dir)
        .with_user(user)
}

fn assert_unavailable(err: Error) {
    match err {
        Error::Store(err) => assert!(err.is_unavailable(), "unexpected store error: {err}"),
        other => panic!("expected a store error, got: {other}"),
    }
}

#[test]
fn unreadable_store_fails_loads_until_restored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = ctx_at(dir.path(), "U1");

    ctx.set_readable(false);
    assert_unavailable(ctx.user_tree().expect_err("lazy load must fail"));
    assert_unavailable(
        ctx.force_reload(RootKind::System)
            .expect_err("reload must fail"),
    );

    ctx.set_readable(true);
    ctx.user_tree().expect("load works once restored");
    ctx.force_reload(RootKind::System)
        .expect("reload works once restored");
}

#[test]
fn read_switch_does_not_affect_already_loaded_trees() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = ctx_at(dir.path(), "U1");

    let tree = ctx.user_tree().expect("user tree");
    tree.root().put("k", "v").expect("put");

    ctx.set_readable(false);
    // The cached tree stays fully usable; only future loads fail.
    let cached = ctx.user_tree().expect("cached tree");
    assert_eq!(cached.root().get("k").expect("get"), Some("v".to_string()));
}

#[test]
fn failed_save_keeps_the_root_dirty() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = ctx_at(dir.path(), "U1");

    let node = ctx
        .user_tree()
        .expect("user tree")
        .root()
        .child("a")
        .expect("child");
    node.put("k", "v").expect("put");
    node.flush(&ctx).expect("flush");

    ctx.set_writable(false);
    assert_unavailable(ctx.persist_pending().expect_err("save must fail"));
    assert!(ctx.is_dirty(RootKind::User), "dirty flag must survive");

    ctx.set_writable(true);
    ctx.persist_pending().expect("save succeeds once restored");
    assert!(!ctx.is_dirty(RootKind::User));

    let fresh = ctx_at(dir.path(), "U1");
    assert_eq!(
        fresh
            .user_tree()
            .expect("user tree")
            .root()
            .child("a")
            .expect("child")
            .get("k")
            .expect("get"),
        Some("v".to_string())
    );
}

#[test]
fn corrupt_document_degrades_lazy_load_but_fails_explicit_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store_dir = dir.path().join("prefs-store");
    fs::create_dir_all(&store_dir).expect("mkdir");
    fs::write(store_dir.join("prefstore-system.xml"), "<not-a-prefstore>").expect("write garbage");

    let ctx = ctx_at(dir.path(), "U1");

    // Lazy import logs the corruption and continues with an empty tree.
    let tree = ctx.system_tree().expect("lazy load degrades");
    assert!(tree.root().keys().expect("keys").is_empty());

    // The explicit reload surfaces the error instead.
    match ctx.force_reload(RootKind::System).expect_err("must surface") {
        Error::Store(err) => assert!(err.is_corrupt(), "unexpected store error: {err}"),
        other => panic!("expected a store error, got: {other}"),
    }
}

#[test]
fn write_switch_only_affects_saves() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = ctx_at(dir.path(), "U1");

    ctx.set_writable(false);
    // Loads and in-memory mutation are untouched by the write switch.
    let tree = ctx.user_tree().expect("load still works");
    tree.root().put("k", "v").expect("put still works");
    ctx.force_reload(RootKind::User).expect("reload still works");
}
