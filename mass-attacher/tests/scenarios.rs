//! End-to-end scenarios driving [`mass_attacher::Attacher`] through its full
//! lifecycle against in-memory fakes, exercising the filter/ABI/arity
//! pipeline the way a real host's BTF + kallsyms + tracefs would.

use mass_attacher::symbols::testing::FixedSymbols;
use mass_attacher::symbols::SymbolRecord;
use mass_attacher::template::testing::{FakeLoader, FakeTemplate};
use mass_attacher::traceable::testing::FixedTraceable;
use mass_attacher::typedb::testing::{FakeTypeDatabase, FakeTypeDatabaseSource};
use mass_attacher::typedb::{FunctionType, TypeId, TypeKind};
use mass_attacher::{Attacher, AttacherOptions, MassAttacherError};

const SCALAR: TypeId = TypeId(1);
const COMPOSITE: TypeId = TypeId(2);
const PTR_TO_COMPOSITE: TypeId = TypeId(3);

fn scalar_typed_db(functions: Vec<FunctionType>) -> FakeTypeDatabase {
    let mut db = FakeTypeDatabase::new()
        .with_kind(SCALAR, TypeKind::Int)
        .with_kind(COMPOSITE, TypeKind::Composite)
        .with_kind(PTR_TO_COMPOSITE, TypeKind::Pointer(Some(COMPOSITE)));
    for func in functions {
        db = db.with_function(func);
    }
    db
}

fn no_limits_options() -> AttacherOptions {
    AttacherOptions {
        raise_resource_limits: false,
        ..AttacherOptions::default()
    }
}

#[test]
fn mixed_arities_attach_independently() {
    let symbols = FixedSymbols(vec![
        SymbolRecord { name: "zero_arg".into(), address: 0x1000 },
        SymbolRecord { name: "two_arg_a".into(), address: 0x2000 },
        SymbolRecord { name: "two_arg_b".into(), address: 0x2100 },
    ]);
    let traceable = FixedTraceable(vec![
        "zero_arg".into(),
        "two_arg_a".into(),
        "two_arg_b".into(),
    ]);
    let db = scalar_typed_db(vec![
        FunctionType {
            type_id: TypeId(10),
            name: "zero_arg".into(),
            return_type_id: Some(SCALAR),
            params: vec![],
        },
        FunctionType {
            type_id: TypeId(11),
            name: "two_arg_a".into(),
            return_type_id: Some(SCALAR),
            params: vec![Some(SCALAR), Some(SCALAR)],
        },
        FunctionType {
            type_id: TypeId(12),
            name: "two_arg_b".into(),
            return_type_id: Some(SCALAR),
            params: vec![Some(SCALAR), Some(SCALAR)],
        },
    ]);

    let mut attacher = Attacher::new(
        Box::new(symbols),
        Box::new(traceable),
        Box::new(FakeTypeDatabaseSource(db)),
        Box::new(FakeTemplate::new()),
        Box::new(FakeLoader::new()),
        no_limits_options(),
    )
    .unwrap();

    attacher.prepare().unwrap();
    assert_eq!(attacher.func_count(), 3);

    attacher.load().unwrap();
    attacher.attach().unwrap();
    attacher.activate().unwrap();

    for i in 0..attacher.func_count() {
        let entry = attacher.func(i).unwrap();
        assert!(entry.fentry_fd.is_some(), "{} missing fentry fd", entry.name);
        assert!(entry.fexit_fd.is_some(), "{} missing fexit fd", entry.name);
    }
}

#[test]
fn incompatible_abi_is_silently_excluded_from_the_plan() {
    let symbols = FixedSymbols(vec![
        SymbolRecord { name: "good".into(), address: 0x1000 },
        SymbolRecord { name: "returns_void".into(), address: 0x2000 },
        SymbolRecord { name: "takes_struct_by_value".into(), address: 0x3000 },
    ]);
    let traceable = FixedTraceable(vec![
        "good".into(),
        "returns_void".into(),
        "takes_struct_by_value".into(),
    ]);
    let db = scalar_typed_db(vec![
        FunctionType {
            type_id: TypeId(10),
            name: "good".into(),
            return_type_id: Some(SCALAR),
            params: vec![Some(SCALAR)],
        },
        FunctionType {
            type_id: TypeId(11),
            name: "returns_void".into(),
            return_type_id: None,
            params: vec![],
        },
        FunctionType {
            type_id: TypeId(12),
            name: "takes_struct_by_value".into(),
            return_type_id: Some(SCALAR),
            params: vec![Some(COMPOSITE)],
        },
    ]);

    let mut attacher = Attacher::new(
        Box::new(symbols),
        Box::new(traceable),
        Box::new(FakeTypeDatabaseSource(db)),
        Box::new(FakeTemplate::new()),
        Box::new(FakeLoader::new()),
        no_limits_options(),
    )
    .unwrap();

    attacher.prepare().unwrap();

    assert_eq!(attacher.func_count(), 1);
    assert_eq!(attacher.func(0).unwrap().name, "good");
}

#[test]
fn pointer_to_composite_return_is_accepted_end_to_end() {
    let symbols = FixedSymbols(vec![SymbolRecord { name: "lookup".into(), address: 0x4000 }]);
    let traceable = FixedTraceable(vec!["lookup".into()]);
    let db = scalar_typed_db(vec![FunctionType {
        type_id: TypeId(10),
        name: "lookup".into(),
        return_type_id: Some(PTR_TO_COMPOSITE),
        params: vec![Some(SCALAR)],
    }]);

    let mut attacher = Attacher::new(
        Box::new(symbols),
        Box::new(traceable),
        Box::new(FakeTypeDatabaseSource(db)),
        Box::new(FakeTemplate::new()),
        Box::new(FakeLoader::new()),
        no_limits_options(),
    )
    .unwrap();

    attacher.prepare().unwrap();
    assert_eq!(attacher.func_count(), 1);
}

#[test]
fn function_missing_from_traceable_set_is_skipped() {
    let symbols = FixedSymbols(vec![SymbolRecord { name: "inlined_away".into(), address: 0x5000 }]);
    let traceable = FixedTraceable(vec![]); // kernel refuses to attach anywhere
    let db = scalar_typed_db(vec![FunctionType {
        type_id: TypeId(10),
        name: "inlined_away".into(),
        return_type_id: Some(SCALAR),
        params: vec![],
    }]);

    let mut attacher = Attacher::new(
        Box::new(symbols),
        Box::new(traceable),
        Box::new(FakeTypeDatabaseSource(db)),
        Box::new(FakeTemplate::new()),
        Box::new(FakeLoader::new()),
        no_limits_options(),
    )
    .unwrap();

    assert!(matches!(
        attacher.prepare(),
        Err(MassAttacherError::NoMatchingFunctions)
    ));
}

#[test]
fn enforced_deny_wins_even_under_a_broad_user_allow() {
    let symbols = FixedSymbols(vec![
        SymbolRecord { name: "sys_open".into(), address: 0x6000 },
        SymbolRecord { name: "migrate_enable".into(), address: 0x6100 },
    ]);
    let traceable = FixedTraceable(vec!["sys_open".into(), "migrate_enable".into()]);
    let db = scalar_typed_db(vec![
        FunctionType {
            type_id: TypeId(10),
            name: "sys_open".into(),
            return_type_id: Some(SCALAR),
            params: vec![Some(SCALAR)],
        },
        FunctionType {
            type_id: TypeId(11),
            name: "migrate_enable".into(),
            return_type_id: Some(SCALAR),
            params: vec![],
        },
    ]);

    let mut attacher = Attacher::new(
        Box::new(symbols),
        Box::new(traceable),
        Box::new(FakeTypeDatabaseSource(db)),
        Box::new(FakeTemplate::new()),
        Box::new(FakeLoader::new()),
        no_limits_options(),
    )
    .unwrap();

    attacher.allow_glob("*").unwrap();
    attacher.prepare().unwrap();

    assert_eq!(attacher.func_count(), 1);
    assert_eq!(attacher.func(0).unwrap().name, "sys_open");
}

#[test]
fn free_is_idempotent_and_runs_again_on_drop() {
    let symbols = FixedSymbols(vec![SymbolRecord { name: "f".into(), address: 0x7000 }]);
    let traceable = FixedTraceable(vec!["f".into()]);
    let db = scalar_typed_db(vec![FunctionType {
        type_id: TypeId(10),
        name: "f".into(),
        return_type_id: Some(SCALAR),
        params: vec![],
    }]);

    let mut attacher = Attacher::new(
        Box::new(symbols),
        Box::new(traceable),
        Box::new(FakeTypeDatabaseSource(db)),
        Box::new(FakeTemplate::new()),
        Box::new(FakeLoader::new()),
        no_limits_options(),
    )
    .unwrap();

    attacher.prepare().unwrap();
    attacher.load().unwrap();
    attacher.attach().unwrap();
    attacher.activate().unwrap();

    attacher.free().unwrap();
    attacher.free().unwrap(); // second call is a no-op, not an error
}
