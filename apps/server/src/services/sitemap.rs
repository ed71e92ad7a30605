//! robots.txt and sitemap.xml for the active Brand.

use std::sync::Arc;

use crate::db::Store;
use crate::Result;

/// `base_url` has no trailing slash; `prefix` is `""` or `/BRAND`.
pub fn robots_txt(base_url: &str, prefix: &str) -> String {
    format!("User-agent: *\nAllow: /\n\nSitemap: {base_url}{prefix}/sitemap.xml\n")
}

fn url_entry(out: &mut String, loc: &str, priority: &str) {
    out.push_str("  <url>\n    <loc>");
    out.push_str(&html_escape::encode_text(loc));
    out.push_str("</loc>\n    <priority>");
    out.push_str(priority);
    out.push_str("</priority>\n  </url>\n");
}

pub struct SitemapService {
    store: Arc<dyn Store>,
}

impl SitemapService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Home page, API root and every published phenotype in Brand scope.
    pub async fn sitemap_xml(
        &self,
        base_url: &str,
        prefix: &str,
        brand_id: Option<i32>,
    ) -> Result<String> {
        let published = self.store.published_phenotypes(brand_id).await?;

        let mut out = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );
        url_entry(&mut out, &format!("{base_url}{prefix}/"), "1.0");
        url_entry(&mut out, &format!("{base_url}{prefix}/api/v1/"), "0.5");
        for (id, _) in &published {
            let encoded = urlencoding::encode(id);
            url_entry(
                &mut out,
                &format!("{base_url}{prefix}/phenotypes/{encoded}/detail/"),
                "0.8",
            );
        }
        out.push_str("</urlset>\n");
        Ok(out)
    }
}
