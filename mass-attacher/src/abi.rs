//! ABI compatibility check: can this function's prototype be traced by the
//! template's fentry/fexit programs?

use crate::typedb::{FunctionType, TypeDatabase, TypeKind};
use crate::MAX_ARGS;

/// Returns `true` iff `func` can be traced, per §4.6:
///
/// - `arg_count <= MAX_ARGS`.
/// - A return type exists (void-returning functions are rejected — see the
///   "Void-return rejection" design note: kept for compatibility with the
///   reference attacher even though the underlying tracer could support it).
/// - The return type, after stripping modifiers/typedefs, is integer, enum,
///   pointer-to-void, or pointer-to-composite. Pointer to anything else is
///   rejected.
/// - Every parameter has a concrete (non-vararg) type which, after
///   stripping, is integer, pointer, or enum.
pub fn is_compatible(db: &dyn TypeDatabase, func: &FunctionType) -> bool {
    if func.arg_count() > MAX_ARGS {
        return false;
    }

    let Some(return_type_id) = func.return_type_id else {
        return false;
    };

    match db.strip(return_type_id) {
        Some(TypeKind::Int) | Some(TypeKind::Enum) => {}
        Some(TypeKind::Pointer(None)) => {}
        Some(TypeKind::Pointer(Some(pointee))) => match db.strip(pointee) {
            Some(TypeKind::Composite) => {}
            _ => return false,
        },
        _ => return false,
    }

    for param in &func.params {
        let Some(param_type_id) = param else {
            return false;
        };
        match db.strip(*param_type_id) {
            Some(TypeKind::Int) | Some(TypeKind::Pointer(_)) | Some(TypeKind::Enum) => {}
            _ => return false,
        }
    }

    true
}
