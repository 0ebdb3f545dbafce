//! Request dispatcher for file manager operations.
//!
//! This module provides the `Dispatcher` struct that receives a request for
//! an instance, checks that the operation is enabled, and runs it on the
//! blocking thread pool. Errors come back as payloads with the physical
//! root scrubbed from the message.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{EngineError, Result};
use crate::files::listing::{self, FolderListing};
use crate::files::transfer::{self, FileStream, Preview};
use crate::files::{archive, operations};
use crate::registry::{Instance, InstanceRegistry};

/// Every kind of operation the engine serves.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    List,
    Search,
    NewFolder,
    NewFile,
    Delete,
    Rename,
    Encrypt,
    Decrypt,
    Zip,
    Unzip,
    Copy,
    Cut,
    Edit,
    Download,
    View,
    GetFileText,
    Upload,
    Preview,
}

impl OperationKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::Search => "search",
            OperationKind::NewFolder => "new-folder",
            OperationKind::NewFile => "new-file",
            OperationKind::Delete => "delete",
            OperationKind::Rename => "rename",
            OperationKind::Encrypt => "encrypt",
            OperationKind::Decrypt => "decrypt",
            OperationKind::Zip => "zip",
            OperationKind::Unzip => "unzip",
            OperationKind::Copy => "copy",
            OperationKind::Cut => "cut",
            OperationKind::Edit => "edit",
            OperationKind::Download => "download",
            OperationKind::View => "view",
            OperationKind::GetFileText => "get-file-text",
            OperationKind::Upload => "upload",
            OperationKind::Preview => "preview",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against one instance. Paths are virtual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Request {
    List {
        path: String,
    },
    Search {
        path: String,
        query: String,
    },
    NewFolder {
        path: String,
        name: String,
    },
    NewFile {
        path: String,
        name: String,
    },
    Delete {
        path: String,
        items: Vec<String>,
    },
    Rename {
        path: String,
        items: Vec<String>,
        new_name: String,
    },
    Encrypt {
        path: String,
        items: Vec<String>,
    },
    Decrypt {
        path: String,
        items: Vec<String>,
    },
    Zip {
        path: String,
        items: Vec<String>,
        file_name: String,
    },
    Unzip {
        path: String,
        items: Vec<String>,
    },
    Copy {
        path: String,
        items: Vec<String>,
    },
    Cut {
        path: String,
        items: Vec<String>,
    },
    Edit {
        file_path: String,
        content: String,
    },
    Download {
        file_path: String,
    },
    View {
        file_path: String,
    },
    GetFileText {
        file_path: String,
    },
    Upload {
        path: String,
        file_name: String,
        data: Vec<u8>,
        #[serde(default)]
        chunk: Option<u32>,
    },
    Preview {
        file_path: String,
    },
}

impl Request {
    /// Kind of operation this request asks for.
    pub fn kind(&self) -> OperationKind {
        match self {
            Request::List { .. } => OperationKind::List,
            Request::Search { .. } => OperationKind::Search,
            Request::NewFolder { .. } => OperationKind::NewFolder,
            Request::NewFile { .. } => OperationKind::NewFile,
            Request::Delete { .. } => OperationKind::Delete,
            Request::Rename { .. } => OperationKind::Rename,
            Request::Encrypt { .. } => OperationKind::Encrypt,
            Request::Decrypt { .. } => OperationKind::Decrypt,
            Request::Zip { .. } => OperationKind::Zip,
            Request::Unzip { .. } => OperationKind::Unzip,
            Request::Copy { .. } => OperationKind::Copy,
            Request::Cut { .. } => OperationKind::Cut,
            Request::Edit { .. } => OperationKind::Edit,
            Request::Download { .. } => OperationKind::Download,
            Request::View { .. } => OperationKind::View,
            Request::GetFileText { .. } => OperationKind::GetFileText,
            Request::Upload { .. } => OperationKind::Upload,
            Request::Preview { .. } => OperationKind::Preview,
        }
    }
}

/// Successful outcome of a request.
#[derive(Debug)]
pub enum Response {
    /// Fresh listing of the target folder.
    Listing(FolderListing),
    /// Decrypted file content.
    Stream(FileStream),
    /// Inline image or icon key.
    Preview(Preview),
    /// Editable text.
    Text(String),
    /// The operation completed with nothing to return.
    Done,
}

/// Error as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ErrorPayload {
    /// Human-readable message with the physical root scrubbed.
    pub message: String,
}

impl ErrorPayload {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Routes requests to the file operations of a registered instance.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<InstanceRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over `registry`.
    pub fn new(registry: Arc<InstanceRegistry>) -> Self {
        Self { registry }
    }

    /// Registry requests are resolved against.
    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    /// Run `request` against the instance `instance_id`.
    ///
    /// Each request runs on its own blocking task; there is no queueing or
    /// locking between requests on the same root.
    pub async fn dispatch(
        &self,
        instance_id: &str,
        request: Request,
    ) -> std::result::Result<Response, ErrorPayload> {
        let kind = request.kind();
        debug!(instance = instance_id, %kind, "Dispatching request");

        let instance = self
            .registry
            .get(instance_id)
            .map_err(|e| ErrorPayload::new(e.to_string()))?;

        if instance.config().is_disabled(kind) {
            warn!(instance = instance_id, %kind, "Rejected disabled operation");
            return Err(ErrorPayload::new(
                EngineError::OperationDisabled(kind).to_string(),
            ));
        }

        let worker = Arc::clone(&instance);
        match tokio::task::spawn_blocking(move || execute(&worker, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => {
                let message = instance.scrub(&e.to_string());
                warn!(instance = instance_id, %kind, error = %message, "Operation failed");
                Err(ErrorPayload::new(message))
            }
            Err(e) => {
                error!(instance = instance_id, %kind, error = %e, "Operation task aborted");
                Err(ErrorPayload::new(format!("{kind} did not complete")))
            }
        }
    }
}

/// Run `request` synchronously against `instance`.
pub fn execute(instance: &Instance, request: Request) -> Result<Response> {
    match request {
        // =====================================================================
        // Listing
        // =====================================================================
        Request::List { path } => listing::list(instance, &path).map(Response::Listing),
        Request::Search { path, query } => {
            listing::search(instance, &path, &query).map(Response::Listing)
        }

        // =====================================================================
        // Mutations
        // =====================================================================
        Request::NewFolder { path, name } => {
            operations::new_folder(instance, &path, &name).map(Response::Listing)
        }
        Request::NewFile { path, name } => {
            operations::new_file(instance, &path, &name).map(Response::Listing)
        }
        Request::Delete { path, items } => {
            operations::delete(instance, &path, &items).map(Response::Listing)
        }
        Request::Rename {
            path,
            items,
            new_name,
        } => operations::rename(instance, &path, &items, &new_name).map(Response::Listing),
        Request::Encrypt { path, items } => {
            operations::encrypt(instance, &path, &items).map(Response::Listing)
        }
        Request::Decrypt { path, items } => {
            operations::decrypt(instance, &path, &items).map(Response::Listing)
        }
        Request::Copy { path, items } => {
            operations::copy(instance, &path, &items).map(Response::Listing)
        }
        Request::Cut { path, items } => {
            operations::cut(instance, &path, &items).map(Response::Listing)
        }
        Request::Edit { file_path, content } => {
            operations::edit(instance, &file_path, &content).map(|()| Response::Done)
        }

        // =====================================================================
        // Archives
        // =====================================================================
        Request::Zip {
            path,
            items,
            file_name,
        } => archive::zip(instance, &path, &items, &file_name).map(Response::Listing),
        Request::Unzip { path, items } => {
            archive::unzip(instance, &path, &items).map(Response::Listing)
        }

        // =====================================================================
        // Transfer
        // =====================================================================
        Request::Download { file_path } => {
            transfer::download(instance, &file_path).map(Response::Stream)
        }
        Request::View { file_path } => transfer::view(instance, &file_path).map(Response::Stream),
        Request::Preview { file_path } => {
            transfer::preview(instance, &file_path).map(Response::Preview)
        }
        Request::GetFileText { file_path } => {
            transfer::get_file_text(instance, &file_path).map(Response::Text)
        }
        Request::Upload {
            path,
            file_name,
            data,
            chunk,
        } => transfer::upload(instance, &path, &file_name, &data, chunk).map(|()| Response::Done),
    }
}
