use rhai::{
    Engine,
    packages::{Package, StandardPackage},
};

use crate::config::ScriptConfig;

/// A sandboxed engine with the standard library and the configured limits.
///
/// Harness functions are registered separately by the [`ScriptApi`](crate::ScriptApi).
pub(crate) fn build_engine(config: &ScriptConfig) -> Engine {
    let mut engine = Engine::new_raw();
    engine.register_global_module(StandardPackage::new().as_shared_module());
    apply_limits(&mut engine, config);
    engine.disable_symbol("eval");
    engine
}

fn apply_limits(engine: &mut Engine, limits: &ScriptConfig) {
    let (depth, fn_depth) = limits.max_expr_depths;
    engine
        .set_strict_variables(true)
        .set_fail_on_invalid_map_property(true)
        .set_max_operations(limits.max_operations)
        .set_max_call_levels(limits.max_call_levels)
        .set_max_expr_depths(depth, fn_depth)
        .set_max_string_size(limits.max_string_size)
        .set_max_array_size(limits.max_collection_size)
        .set_max_map_size(limits.max_collection_size)
        .set_max_modules(limits.max_modules);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_variables_fail_to_compile() {
        let engine = build_engine(&ScriptConfig::default());
        assert!(engine.compile("let x = 1; x + 1").is_ok());
        assert!(engine.compile("y + 1").is_err());
    }

    #[test]
    fn eval_is_disabled() {
        let engine = build_engine(&ScriptConfig::default());
        assert!(engine.compile(r#"eval("1")"#).is_err());
    }

    #[test]
    fn collection_limit_applies() {
        let config = ScriptConfig {
            max_collection_size: 10,
            ..ScriptConfig::default()
        };
        let engine = build_engine(&config);
        assert!(engine.eval::<rhai::Array>("[1, 2, 3]").is_ok());
        let grow = "let a = []; for i in 0..20 { a.push(i); } a";
        assert!(engine.eval::<rhai::Array>(grow).is_err());
    }
}
