//! Generated error pages.

use http::StatusCode;

/// The auto-generated HTML page for an error status.
pub(crate) fn make_status_page(status: StatusCode) -> String {
    let reason = status.canonical_reason().unwrap_or("Unknown");
    let code = status.as_u16();
    format!(
        "<!DOCTYPE html>\n\
         <html>\n\
         <head><title>{code} {reason}</title></head>\n\
         <body>\n\
         <center><h1>{code} {reason}</h1></center>\n\
         <hr><center>ferry/{version}</center>\n\
         </body>\n\
         </html>\n",
        version = env!("CARGO_PKG_VERSION"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_names_the_status() {
        let page = make_status_page(StatusCode::NOT_FOUND);
        assert!(page.contains("<title>404 Not Found</title>"));
        assert!(page.contains("<h1>404 Not Found</h1>"));
    }
}
