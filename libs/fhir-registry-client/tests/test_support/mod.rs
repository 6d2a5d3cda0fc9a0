use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};
use vigil_registry_client::RegistryConfig;

/// Build a package tarball with the given manifest dependencies and resources.
pub fn package_tgz(name: &str, version: &str, dependencies: &[(&str, &str)], resources: &[Value]) -> Vec<u8> {
    let deps: serde_json::Map<String, Value> = dependencies
        .iter()
        .map(|(n, v)| (n.to_string(), json!(v)))
        .collect();
    let manifest = json!({"name": name, "version": version, "dependencies": deps});

    let mut files = vec![("package/package.json".to_string(), manifest)];
    for (i, resource) in resources.iter().enumerate() {
        files.push((format!("package/resource-{i}.json"), resource.clone()));
    }

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, value) in files {
        let bytes = serde_json::to_vec(&value).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_size(bytes.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, bytes.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn listing(versions: &[&str]) -> Value {
    let entries: serde_json::Map<String, Value> = versions
        .iter()
        .map(|v| (v.to_string(), json!({"version": v})))
        .collect();
    json!({"versions": entries})
}

pub fn config(registry_url: &str, cache_dir: &std::path::Path) -> RegistryConfig {
    RegistryConfig {
        registry_url: registry_url.to_string(),
        cache_dir: Some(cache_dir.to_path_buf()),
        http_timeout_ms: 5_000,
        ..Default::default()
    }
}
