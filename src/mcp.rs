use std::sync::{Arc, Mutex};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config::Config,
    config_db::ConfigDb,
    data_dir::DataDir,
    domain::Domain,
    error,
    grounding::{format_context, summarize},
    incremental::load_registry,
    retrieval::Retriever,
    vector_index::VectorIndex,
};

struct ManualsState {
    config_db: ConfigDb,
    index: Arc<VectorIndex>,
    embedding_model: String,
    reranker: String,
    answer_backend: String,
    retriever: Mutex<Retriever>,
}

#[derive(Clone)]
pub struct ManualsMcpServer {
    state: Arc<ManualsState>,
    tool_router: ToolRouter<Self>,
}

impl ManualsMcpServer {
    fn new(state: ManualsState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl ManualsMcpServer {
    /// Retrieve ranked manual passages for a question.
    #[tool(
        name = "manuals_retrieve",
        description = "Retrieve the manual passages that best answer a question, with document, page and section for citation."
    )]
    pub async fn manuals_retrieve(
        &self,
        params: Parameters<RetrieveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;

        let context = {
            let mut retriever = self.state.retriever.lock().map_err(|_| {
                rmcp::ErrorData::internal_error("retriever lock poisoned", None)
            })?;
            retriever
                .retrieve_limited(&params.query, params.limit)
                .map_err(|e| mcp_error("retrieval failed", e))?
        };

        let summary = summarize(&context);
        let text = if context.is_empty() {
            format!("No passages found for \"{}\"", params.query)
        } else {
            let suffix = if context.len() == 1 { "" } else { "s" };
            format!(
                "Found {} passage{suffix} for \"{}\":\n\n{}",
                context.len(),
                params.query,
                format_context(&context.passages)
            )
        };

        let structured = serde_json::to_value(RetrieveResponse {
            context,
            files: summary.files,
            domain_hint: summary.domain_hint,
        })
        .map_err(|e| mcp_error("failed to serialize context", e))?;

        let mut result = CallToolResult::success(vec![Content::text(text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Report what is indexed.
    #[tool(
        name = "manuals_status",
        description = "Show the indexed manuals, chunk count, domains and configured models."
    )]
    pub async fn manuals_status(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let state = &self.state;
        let chunks = state
            .index
            .len()
            .map_err(|e| mcp_error("failed to read index", e))?;
        let domains = state
            .index
            .domains()
            .map_err(|e| mcp_error("failed to read index", e))?;
        let manuals: Vec<ManualItem> = load_registry(&state.config_db)
            .map_err(|e| mcp_error("failed to read registry", e))?
            .into_iter()
            .map(|r| ManualItem {
                doc_id: r.short_id(),
                title: r.title,
                path: r.relative_path,
                domains: r.domains,
                pages: r.page_count,
                chunks: r.chunk_count,
            })
            .collect();

        let text = format!(
            "{} manual(s), {chunks} chunk(s); embedding model {}, re-ranker {}",
            manuals.len(),
            state.embedding_model,
            state.reranker
        );
        let structured = serde_json::to_value(StatusResponse {
            chunks,
            domains,
            embedding_model: state.embedding_model.clone(),
            reranker: state.reranker.clone(),
            answer_backend: state.answer_backend.clone(),
            manuals,
        })
        .map_err(|e| mcp_error("failed to serialize status", e))?;

        let mut result = CallToolResult::success(vec![Content::text(text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for ManualsMcpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::default();
        server_info.name = "manualrag".to_string();
        server_info.title = Some("manualrag MCP".to_string());
        server_info.version = env!("CARGO_PKG_VERSION").to_string();

        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info.instructions = Some(
            "Use manuals_retrieve to fetch cited manual passages before answering product questions. Cite the document and page of every passage you use."
                .to_string(),
        );
        info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    /// The user's question.
    pub query: String,
    /// Maximum number of passages (capped by rerank_top_k).
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveResponse {
    #[serde(flatten)]
    context: crate::retrieval::QueryContext,
    files: Vec<String>,
    domain_hint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    chunks: u64,
    domains: Vec<Domain>,
    embedding_model: String,
    reranker: String,
    answer_backend: String,
    manuals: Vec<ManualItem>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ManualItem {
    doc_id: String,
    title: String,
    path: String,
    domains: Vec<Domain>,
    pages: usize,
    chunks: usize,
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

fn build_state(
    data_dir: &DataDir,
    config_db: ConfigDb,
    config: &Config,
) -> error::Result<ManualsState> {
    let index = Arc::new(VectorIndex::open(&data_dir.index_db())?);
    let embedder = config.embedding.build();
    let reranker = config.reranker.build();
    let retriever = Retriever::new(
        index.clone(),
        embedder,
        Some(reranker),
        config.classifier(),
        config.retrieval,
    )?;

    Ok(ManualsState {
        config_db,
        index,
        embedding_model: config.embedding.to_string(),
        reranker: config.reranker.to_string(),
        answer_backend: config.answer.to_string(),
        retriever: Mutex::new(retriever),
    })
}

pub fn run_mcp(
    data_dir: DataDir,
    config_db: ConfigDb,
    config: &Config,
) -> error::Result<()> {
    let server = ManualsMcpServer::new(build_state(&data_dir, config_db, config)?);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Settings,
        embedding::EmbeddingBackend,
        ingestion::Ingestor,
        walker::discover_manuals,
    };

    fn offline_config() -> Config {
        let mut settings = Settings::default();
        settings.set("embedding_model_id", "hash:64").unwrap();
        settings.set("reranker_model_id", "lexical").unwrap();
        settings.set("rerank_top_k", "2").unwrap();
        settings.validate().unwrap()
    }

    fn server_with_manuals() -> (tempfile::TempDir, ManualsMcpServer) {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = DataDir::resolve(Some(tmp.path())).unwrap();
        let manuals = data_dir.default_manuals_dir();
        std::fs::create_dir_all(&manuals).unwrap();
        std::fs::write(
            manuals.join("Claims Manual.txt"),
            "1. Submitting\nTo submit a claim open it and press Submit.",
        )
        .unwrap();
        std::fs::write(
            manuals.join("Print Services.txt"),
            "Statements print in a nightly batch.",
        )
        .unwrap();

        let config = offline_config();
        assert_eq!(config.embedding, EmbeddingBackend::Hashed { dimension: 64 });
        let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
        {
            let index = VectorIndex::open(&data_dir.index_db()).unwrap();
            let mut ingestor = Ingestor::new(&config, config.embedding.build(), None);
            ingestor
                .rebuild(&discover_manuals(&manuals).unwrap(), &index, &config_db)
                .unwrap();
        }

        let state = build_state(&data_dir, config_db, &config).unwrap();
        (tmp, ManualsMcpServer::new(state))
    }

    fn summary_text(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn retrieve_tool_returns_structured_context() {
        let (_tmp, server) = server_with_manuals();

        let result = server
            .manuals_retrieve(Parameters(RetrieveParams {
                query: "How do I submit a claim?".to_string(),
                limit: Some(5),
            }))
            .await
            .unwrap();

        let structured = result.structured_content.clone().expect("structured");
        let passages = structured
            .get("passages")
            .and_then(|v| v.as_array())
            .expect("passages array");
        assert_eq!(passages.len(), 2);
        assert_eq!(
            passages[0].get("relative_path").and_then(|v| v.as_str()),
            Some("Claims Manual.txt")
        );
        assert_eq!(
            passages[0].get("section").and_then(|v| v.as_str()),
            Some("1. Submitting")
        );
        assert_eq!(
            structured.get("domains").and_then(|v| v.as_array()).map(Vec::len),
            Some(1)
        );

        let text = summary_text(&result);
        assert!(text.contains("Found 2 passages"));
        assert!(text.contains("SOURCE: Claims Manual.txt"));
    }

    #[tokio::test]
    async fn retrieve_tool_handles_blank_query() {
        let (_tmp, server) = server_with_manuals();

        let result = server
            .manuals_retrieve(Parameters(RetrieveParams {
                query: "  ".to_string(),
                limit: None,
            }))
            .await
            .unwrap();
        assert!(summary_text(&result).starts_with("No passages found"));
    }

    #[tokio::test]
    async fn status_tool_lists_manuals() {
        let (_tmp, server) = server_with_manuals();

        let result = server.manuals_status().await.unwrap();
        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(
            structured.get("manuals").and_then(|v| v.as_array()).map(Vec::len),
            Some(2)
        );
        assert_eq!(
            structured.get("chunks").and_then(|v| v.as_u64()),
            Some(2)
        );
        assert_eq!(
            structured.get("embeddingModel").and_then(|v| v.as_str()),
            Some("hash:64")
        );
        assert!(summary_text(&result).starts_with("2 manual(s)"));
    }
}
