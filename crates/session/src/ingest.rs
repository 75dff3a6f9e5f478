//! File ingestion: validate, chunk, analyze, persist.
//!
//! Uploaded files are split into token-budgeted chunks; each chunk is sent
//! through the model for analysis and the analyses are appended to the
//! conversation in order, so later messages can refer back to the file.

use std::sync::Arc;
use tidechat_config::UploadConfig;
use tidechat_context::token;
use tidechat_core::error::{Result, ValidationError};
use tidechat_core::message::{ConversationId, Turn};
use tidechat_core::model::{GenerateRequest, ModelClient, Segment};
use tidechat_core::store::ConversationStore;
use tracing::{debug, info};

/// Outcome of a completed ingestion.
#[derive(Debug, Clone)]
pub struct IngestReport {
    /// Number of chunks the file was split into.
    pub chunks: usize,
    /// All chunk analyses joined into one labeled text.
    pub analysis: String,
    /// Token total of the conversation after the analyses were appended.
    pub total_tokens: usize,
}

/// Check a filename and size against the upload policy.
///
/// Returns the lowercase extension on success.
pub fn validate_upload(filename: &str, size_bytes: u64, config: &UploadConfig) -> Result<String> {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    if !config.allowed_extensions.contains(&extension) {
        return Err(ValidationError::UnsupportedFileType { extension }.into());
    }

    if size_bytes > config.max_bytes {
        return Err(ValidationError::FileTooLarge {
            size_bytes,
            limit_bytes: config.max_bytes,
        }
        .into());
    }

    Ok(extension)
}

/// Split text into chunks of at most `chunk_tokens` measured tokens.
///
/// Splits on line boundaries where possible; a single line larger than the
/// chunk budget is hard-split on char boundaries. Chunk order follows text
/// order and no content is dropped.
pub fn chunk_by_tokens(text: &str, chunk_tokens: usize) -> Vec<String> {
    let budget_chars = chunk_tokens * 4;
    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.split_inclusive('\n') {
        if token::measure(line) > chunk_tokens {
            // Oversized line: flush what we have, then hard-split the line.
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut piece = String::new();
            for c in line.chars() {
                // Flush before pushing so a multi-byte char never carries
                // the piece past the ceiling.
                if !piece.is_empty() && piece.len() + c.len_utf8() > budget_chars {
                    chunks.push(std::mem::take(&mut piece));
                }
                piece.push(c);
            }
            if !piece.is_empty() {
                current = piece;
            }
            continue;
        }

        if !current.is_empty() && token::measure(&current) + token::measure(line) > chunk_tokens {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(line);
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Runs uploads through the model chunk by chunk.
pub struct IngestionPipeline {
    model: Arc<dyn ModelClient>,
    store: Arc<dyn ConversationStore>,
    upload: UploadConfig,
    reply_tokens: usize,
    temperature: f32,
}

impl IngestionPipeline {
    pub fn new(
        model: Arc<dyn ModelClient>,
        store: Arc<dyn ConversationStore>,
        upload: UploadConfig,
        reply_tokens: usize,
        temperature: f32,
    ) -> Self {
        Self {
            model,
            store,
            upload,
            reply_tokens,
            temperature,
        }
    }

    /// Ingest an uploaded file into a conversation.
    ///
    /// Chunks are analyzed sequentially and each analysis is persisted as an
    /// assistant turn before the next chunk is sent, so a mid-file model
    /// failure leaves the analyses completed so far in place.
    pub async fn ingest(
        &self,
        conversation_id: &ConversationId,
        filename: &str,
        bytes: &[u8],
    ) -> Result<IngestReport> {
        validate_upload(filename, bytes.len() as u64, &self.upload)?;

        let text =
            std::str::from_utf8(bytes).map_err(|_| ValidationError::InvalidEncoding)?;

        // The conversation must exist before we spend model calls on it.
        self.store.get(conversation_id).await?;

        let chunks = chunk_by_tokens(text, self.upload.chunk_tokens);
        let chunk_count = chunks.len();
        info!(
            conversation_id = %conversation_id,
            filename,
            chunks = chunk_count,
            "ingesting file"
        );

        let mut total = self
            .store
            .append_turn(
                conversation_id,
                Turn::user(format!(
                    "Uploaded file: {filename} ({chunk_count} chunks)"
                )),
            )
            .await?;

        let mut analysis = String::new();
        for (i, chunk) in chunks.into_iter().enumerate() {
            let n = i + 1;
            debug!(conversation_id = %conversation_id, chunk = n, "analyzing chunk");

            let prompt = format!(
                "Analyze the following text (part {n} of {chunk_count} of the file \
                 {filename}). Summarize the key points.\n\n{chunk}"
            );
            let request = GenerateRequest {
                segments: vec![Segment::user(prompt)],
                max_tokens: self.reply_tokens as u32,
                temperature: self.temperature,
            };

            let reply = self.model.complete(request).await?;

            let labeled = format!("-- Analysis for chunk {n} of {chunk_count} --\n{reply}");
            total = self
                .store
                .append_turn(conversation_id, Turn::assistant(labeled.clone()))
                .await?;

            if !analysis.is_empty() {
                analysis.push_str("\n\n");
            }
            analysis.push_str(&labeled);
        }

        Ok(IngestReport {
            chunks: chunk_count,
            analysis,
            total_tokens: total,
        })
    }
}
