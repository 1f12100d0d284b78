use std::path::{Path, PathBuf};

use manualrag::{
    Config,
    ConfigDb,
    DataDir,
    VectorIndex,
    ingestion::Ingestor,
    walker::discover_manuals,
};
use rmcp::{
    ServiceExt,
    model::CallToolRequestParams,
    transport::{ConfigureCommandExt, TokioChildProcess},
};
use serde_json::json;

fn setup_config(config_db: &ConfigDb) -> Result<(), Box<dyn std::error::Error>> {
    config_db.set_setting("embedding_model_id", "hash:64")?;
    config_db.set_setting("reranker_model_id", "lexical")?;
    config_db.set_setting("enable_domain_filter", "true")?;
    Ok(())
}

fn setup_fixture(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = DataDir::resolve(Some(root))?;
    let manuals = data_dir.default_manuals_dir();
    std::fs::create_dir_all(manuals.join("billing"))?;
    std::fs::write(
        manuals.join("Claims Manual.txt"),
        "1. Submitting\nTo submit a claim open the claim and press Submit.\n\n\
         2. Corrections\nA corrected claim replaces the original claim.\n",
    )?;
    std::fs::write(
        manuals.join("billing").join("print-services.md"),
        "# Statements\nPatient statements print in a nightly batch.\n",
    )?;

    let config_db = ConfigDb::open(&data_dir.config_db())?;
    setup_config(&config_db)?;

    let config = Config::load(&config_db, &[])?;
    let index = VectorIndex::open(&data_dir.index_db())?;
    let mut ingestor = Ingestor::new(&config, config.embedding.build(), None);
    let report =
        ingestor.rebuild(&discover_manuals(&manuals)?, &index, &config_db)?;
    assert_eq!(report.documents, 2);

    Ok(())
}

#[tokio::test]
async fn mcp_stdio_retrieve_roundtrip() -> Result<(), Box<dyn std::error::Error>>
{
    let tempdir = tempfile::tempdir()?;
    setup_fixture(tempdir.path())?;

    let bin = manualrag_bin()?;
    let transport = TokioChildProcess::new(
        tokio::process::Command::new(bin).configure(|cmd| {
            cmd.arg("mcp")
                .arg("--quiet")
                .env("MANUALRAG_DATA_DIR", tempdir.path());
        }),
    )?;

    let client = ().serve(transport).await?;

    let args = json!({
        "query": "How do I submit a claim?",
        "limit": 3
    });

    let result = client
        .peer()
        .call_tool(CallToolRequestParams::new("manuals_retrieve")
                .with_arguments(args.as_object().unwrap().clone()),
        )
        .await?;

    let structured = result.structured_content.expect("structured content");
    let passages = structured
        .get("passages")
        .and_then(|v| v.as_array())
        .expect("passages array");

    assert!(!passages.is_empty());
    assert!(passages.len() <= 3);
    for passage in passages {
        assert_eq!(
            passage.get("relative_path").and_then(|v| v.as_str()),
            Some("Claims Manual.txt")
        );
    }
    assert_eq!(
        structured.get("domains"),
        Some(&json!(["claims"]))
    );
    assert_eq!(
        structured.get("fallback_used").and_then(|v| v.as_bool()),
        Some(false)
    );

    let status = client
        .peer()
        .call_tool(CallToolRequestParams::new("manuals_status"))
        .await?;
    let structured = status.structured_content.expect("structured content");
    let manuals = structured
        .get("manuals")
        .and_then(|v| v.as_array())
        .expect("manuals array");
    let paths: Vec<&str> = manuals
        .iter()
        .filter_map(|m| m.get("path").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(paths, vec!["Claims Manual.txt", "billing/print-services.md"]);
    assert_eq!(
        structured.get("reranker").and_then(|v| v.as_str()),
        Some("lexical")
    );

    client.cancel().await?;
    Ok(())
}

fn manualrag_bin() -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Ok(bin) = std::env::var("CARGO_BIN_EXE_manualrag") {
        return Ok(PathBuf::from(bin));
    }

    let mut path = std::env::current_exe()?;
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("manualrag");

    if cfg!(windows) {
        path.set_extension("exe");
    }

    Ok(path)
}
