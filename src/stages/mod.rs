// src/stages/mod.rs

//! The fixed catalog of stage runners.
//!
//! Each submodule exposes one `run`-style function per stage with the
//! [`StageFn`](crate::engine::StageFn) signature; [`bootstrap`] builds the
//! registry from them.

pub mod diff_meta;
pub mod discover;
pub mod echo;
pub mod enrich;
pub mod locators;
pub mod lua;
pub mod meta_files;
pub mod output;
pub mod parse_yaml;
pub mod shell_exec;

use crate::engine::Registry;

/// Stage names.
pub mod names {
    pub const ECHO: &str = "echo";
    pub const VALIDATE_CONFIG: &str = "validate-config";
    pub const DISCOVER_META_FILES: &str = "discover-meta-files";
    pub const DISCOVER_INPUT_FILES: &str = "discover-input-files";
    pub const PARSE_VALIDATE_YAML: &str = "parse-validate-yaml";
    pub const VALIDATE_LOCATORS: &str = "validate-locators";
    pub const LUA_FILTER: &str = "lua-filter";
    pub const LUA_MAP: &str = "lua-map";
    pub const SHELL_EXEC: &str = "shell-exec";
    pub const LUA_POSTMAP: &str = "lua-postmap";
    pub const LUA_REDUCE: &str = "lua-reduce";
    pub const LOAD_EXISTING_META: &str = "load-existing-meta";
    pub const MERGE_META: &str = "merge-meta";
    pub const WRITE_META_FILES: &str = "write-meta-files";
    pub const WRITE_UPDATED_META_FILES: &str = "write-updated-meta-files";
    pub const COMPUTE_META_DIFF: &str = "compute-meta-diff";
    pub const ENRICH_FILEINFO: &str = "enrich-fileinfo";
    pub const ENRICH_GIT: &str = "enrich-git";
    pub const WRITE_OUTPUT: &str = "write-output";
}

/// Build the registry with every stage in the catalog.
pub fn bootstrap() -> Registry {
    let mut reg = Registry::new();
    reg.register(names::ECHO, echo::echo);
    reg.register(names::VALIDATE_CONFIG, echo::validate_config);
    reg.register(names::DISCOVER_META_FILES, discover::discover_meta_files);
    reg.register(names::DISCOVER_INPUT_FILES, discover::discover_input_files);
    reg.register(names::PARSE_VALIDATE_YAML, parse_yaml::parse_validate_yaml);
    reg.register(names::VALIDATE_LOCATORS, locators::validate_locators);
    reg.register(names::LUA_FILTER, lua::lua_filter);
    reg.register(names::LUA_MAP, lua::lua_map);
    reg.register(names::SHELL_EXEC, shell_exec::shell_exec);
    reg.register(names::LUA_POSTMAP, lua::lua_postmap);
    reg.register(names::LUA_REDUCE, lua::lua_reduce);
    reg.register(names::LOAD_EXISTING_META, meta_files::load_existing_meta);
    reg.register(names::MERGE_META, meta_files::merge_meta);
    reg.register(names::WRITE_META_FILES, meta_files::write_meta_files);
    reg.register(names::WRITE_UPDATED_META_FILES, meta_files::write_updated_meta_files);
    reg.register(names::COMPUTE_META_DIFF, diff_meta::compute_meta_diff);
    reg.register(names::ENRICH_FILEINFO, enrich::enrich_fileinfo);
    reg.register(names::ENRICH_GIT, enrich::enrich_git);
    reg.register(names::WRITE_OUTPUT, output::write_output);
    reg
}

/// Run blocking filesystem work off the reactor, flattening errors to text.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(e) => Err(format!("worker failed: {e}")),
    }
}
