//! Public URLs of stored files

use axum::Extension;
use serde::Deserialize;
use serde::Serialize;

use crate::config::Settings;
use crate::config::is_bucket_path;
use crate::storage::Storage;

use super::CurrentUser;
use super::Error;
use super::PathParameters;
use super::Success;

/// Bucket and path of a stored file
#[derive(Debug, Deserialize)]
pub struct StoredFile {
    bucket: String,
    path: String,
}

/// A public URL
#[derive(Debug, Serialize)]
pub struct PublicUrl {
    url: String,
}

/// Resolve the public URL of a file in a bucket
///
/// Request:
/// ```sh
/// curl -v -H 'Authorization: Bearer tokentokentoken' \
///     http://localhost:6000/api/storage/team/2024/core-team.jpg
/// ```
///
/// Response:
/// ```json
/// { "data": { "url": "http://localhost:54321/storage/v1/object/public/team/2024/core-team.jpg" } }
/// ```
pub async fn resolve<S: Storage>(
    Extension(settings): Extension<Settings>,
    _current_user: CurrentUser<S>,
    PathParameters(file): PathParameters<StoredFile>,
) -> Result<Success<PublicUrl>, Error> {
    if file.path.trim_matches('/').is_empty() {
        return Err(Error::bad_request("Missing path"));
    }

    if !is_bucket_path(&file.bucket) || !is_bucket_path(&file.path) {
        return Err(Error::bad_request("Invalid path"));
    }

    Ok(Success::ok(PublicUrl {
        url: settings.public_url(&file.bucket, &file.path),
    }))
}
