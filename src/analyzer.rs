//! Análisis local de un fichero candidato: nombre, tipo, tamaño, extensión y
//! una previsualización corta del contenido cuando es texto o PDF pequeño.
//! Nunca hace llamadas de red.

use std::fs::File;
use std::io::Read;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use mime_guess::MimeGuess;
use tracing::{debug, warn};

use crate::models::{FileContent, FileSignature, FileUpload};

/// Ficheros mayores que esto no se previsualizan.
pub const PREVIEW_SIZE_CEILING: u64 = 10 * 1024;
/// Caracteres máximos de la previsualización.
pub const PREVIEW_MAX_CHARS: usize = 500;

const TEXT_MIME_PREFIXES: &[&str] = &["text/", "application/json", "application/xml"];

pub fn analyze(file: &FileUpload) -> FileSignature {
    let extension = extension_of(&file.file_name);

    // Si el cliente no declara tipo, lo deducimos de la extensión.
    let mime_type = if file.mime_type.trim().is_empty() {
        MimeGuess::from_path(&file.file_name)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_default()
    } else {
        file.mime_type.trim().to_lowercase()
    };

    let content_preview = if wants_preview(&mime_type, &extension, file.size_bytes) {
        extract_preview(&file.content, is_pdf(&mime_type, &extension))
    } else {
        None
    };

    FileSignature {
        file_name: file.file_name.clone(),
        mime_type,
        size_bytes: file.size_bytes,
        extension,
        content_preview,
    }
}

/// Extensión en minúsculas sin punto; vacía si el nombre no tiene.
pub fn extension_of(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(|ext| ext.to_lowercase())
        .unwrap_or_default()
}

fn is_pdf(mime_type: &str, extension: &str) -> bool {
    extension == "pdf" || mime_type.contains("pdf")
}

fn wants_preview(mime_type: &str, extension: &str, size_bytes: u64) -> bool {
    let text_like = TEXT_MIME_PREFIXES.iter().any(|p| mime_type.starts_with(p));
    (text_like || is_pdf(mime_type, extension)) && size_bytes < PREVIEW_SIZE_CEILING
}

fn extract_preview(content: &FileContent, pdf: bool) -> Option<String> {
    let bytes = match read_head(content) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(e) => {
            warn!("No se pudo leer el contenido para la previsualización: {}", e);
            return None;
        }
    };

    let text = if pdf {
        pdf_text(&bytes)?
    } else {
        String::from_utf8_lossy(&bytes).into_owned()
    };

    let preview: String = text.trim().chars().take(PREVIEW_MAX_CHARS).collect();
    if preview.is_empty() {
        None
    } else {
        Some(preview)
    }
}

/// Lee como mucho `PREVIEW_SIZE_CEILING` bytes del contenido.
fn read_head(content: &FileContent) -> std::io::Result<Option<Vec<u8>>> {
    match content {
        FileContent::None => Ok(None),
        FileContent::InMemory(bytes) => {
            let end = bytes.len().min(PREVIEW_SIZE_CEILING as usize);
            Ok(Some(bytes[..end].to_vec()))
        }
        FileContent::OnDisk(path) => {
            let mut buf = Vec::new();
            File::open(path)?
                .take(PREVIEW_SIZE_CEILING)
                .read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
    }
}

fn pdf_text(bytes: &[u8]) -> Option<String> {
    // pdf-extract puede entrar en pánico con PDFs malformados.
    match panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text_from_mem(bytes))) {
        Ok(Ok(text)) => Some(text),
        Ok(Err(e)) => {
            debug!("No se pudo extraer texto del PDF: {}", e);
            None
        }
        Err(_) => {
            warn!("pdf-extract abortó al leer un PDF; se omite la previsualización");
            None
        }
    }
}
