//! Linker Composition for the Guest Runtime
//!
//! Registers the whole `wbg` surface from host-bridge into a linker for the
//! runtime's own store type, and checks a compiled module's imports against
//! it before instantiation so a mismatch names every offending import at
//! once instead of failing on the first.

use crate::error::{RuntimeError, RuntimeResult};
use crate::instance::GuestState;
use tracing::debug;
use wasmtime::{AsContextMut, Engine, Extern, ExternType, FuncType, Linker, Module};

/// Create a linker with all host functions
pub fn create_linker(engine: &Engine) -> RuntimeResult<Linker<GuestState>> {
    let mut linker = Linker::new(engine);

    host_bridge::register_all_functions(&mut linker).map_err(|e| {
        RuntimeError::instantiation(format!("Failed to register host-bridge functions: {}", e))
    })?;

    Ok(linker)
}

fn arity(ty: &FuncType) -> String {
    format!("{} params -> {} results", ty.params().len(), ty.results().len())
}

/// Every import of `module` must be a function the linker provides with the
/// same arity
pub fn check_imports(
    linker: &Linker<GuestState>,
    mut store: impl AsContextMut<Data = GuestState>,
    module: &Module,
) -> RuntimeResult<()> {
    let mut problems = Vec::new();
    let mut checked = 0;

    for import in module.imports() {
        checked += 1;
        let qualified = format!("{}::{}", import.module(), import.name());
        let ExternType::Func(expected) = import.ty() else {
            problems.push(format!("{} is not a function import", qualified));
            continue;
        };

        match linker.get(&mut store, import.module(), import.name()) {
            Some(Extern::Func(func)) => {
                let provided = func.ty(&store);
                if provided.params().len() != expected.params().len()
                    || provided.results().len() != expected.results().len()
                {
                    problems.push(format!(
                        "{} expects {} but the bridge provides {}",
                        qualified,
                        arity(&expected),
                        arity(&provided)
                    ));
                }
            }
            Some(_) => problems.push(format!("{} is not a function on the host", qualified)),
            None => problems.push(format!("{} is not provided by the bridge", qualified)),
        }
    }

    if problems.is_empty() {
        debug!("all {} guest imports resolved", checked);
        Ok(())
    } else {
        Err(RuntimeError::instantiation(format!(
            "{} of {} imports cannot be satisfied: {}",
            problems.len(),
            checked,
            problems.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Store;

    fn check(wat: &str) -> RuntimeResult<()> {
        let engine = Engine::default();
        let linker = create_linker(&engine)?;
        let module = Module::new(&engine, wat).unwrap();
        let mut store = Store::new(&engine, GuestState::default());
        check_imports(&linker, &mut store, &module)
    }

    #[test]
    fn test_known_imports_pass() {
        let wat = r#"(module
            (import "wbg" "__wbindgen_object_drop_ref" (func (param i32)))
            (import "wbg" "__wbg_setTimeout" (func (param i32 i32) (result i32))))"#;
        assert!(check(wat).is_ok());
    }

    #[test]
    fn test_every_problem_is_named() {
        let wat = r#"(module
            (import "wbg" "__wbg_no_such_thing" (func))
            (import "wbg" "__wbindgen_object_drop_ref" (func (param i32 i32)))
            (import "env" "memory" (memory 1)))"#;
        let err = check(wat).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("3 of 3 imports"));
        assert!(message.contains("wbg::__wbg_no_such_thing is not provided"));
        assert!(message.contains("wbg::__wbindgen_object_drop_ref expects 2 params -> 0 results"));
        assert!(message.contains("env::memory is not a function import"));
    }
}
