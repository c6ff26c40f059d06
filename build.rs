//! 编译期把 migrations/*.sql 嵌入二进制，供 `privchat-delivery migrate` 使用

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// 迁移文件名须形如 `001_xxx.sql`；`000_` 开头的为手工脚本，不参与自动迁移
fn collect_migrations(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "sql"))
        .filter(|p| {
            let stem = p.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            let prefix: String = stem.chars().take_while(|c| c.is_ascii_digit()).collect();
            if prefix.is_empty() {
                panic!("迁移文件缺少序号前缀: {}", p.display());
            }
            !prefix.chars().all(|c| c == '0')
        })
        .collect();
    files.sort();
    files
}

fn main() {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = env::var("OUT_DIR").unwrap();
    let migrations_dir = Path::new(&manifest_dir).join("migrations");

    println!("cargo:rerun-if-changed=migrations");
    println!("cargo:rerun-if-changed=build.rs");

    let rows: Vec<String> = collect_migrations(&migrations_dir)
        .iter()
        .map(|path| {
            let name = path.file_stem().unwrap().to_string_lossy();
            format!("    ({:?}, include_str!({:?})),", name, path.display().to_string())
        })
        .collect();

    let generated = format!(
        "/// (迁移名, SQL)，按文件名排序\npub const MIGRATIONS: &[(&str, &str)] = &[\n{}\n];\n",
        rows.join("\n")
    );
    fs::write(Path::new(&out_dir).join("migrations.rs"), generated)
        .expect("无法写入 migrations.rs");
}
