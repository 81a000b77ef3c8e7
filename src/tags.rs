//! HTML tags referencing resolved assets.

use std::fmt::Write;

use crate::assets::Assets;
use crate::config::Options;
use crate::core::{extension, lock};
use crate::error::ResolveError;
use crate::plugin::Attributes;
use crate::resolve::{self, ResolveOptions};

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

fn render(attributes: &Attributes) -> String {
    let mut out = String::new();
    for (key, value) in attributes {
        let _ = write!(out, " {}=\"{}\"", escape(key), escape(value));
    }
    out
}

pub(crate) fn script(url: &str, _: &Options, attributes: &Attributes) -> String {
    let attributes = render(attributes);
    format!("<script src=\"{}\"{attributes}></script>", escape(url))
}

pub(crate) fn stylesheet(url: &str, _: &Options, attributes: &Attributes) -> String {
    format!(
        "<link rel=\"stylesheet\" href=\"{}\"{}>",
        escape(url),
        render(attributes)
    )
}

impl Assets {
    /// Renders the HTML tag for an identifier using the formatter registered
    /// for its extension.
    ///
    /// With [`Options::separate_bundles`] a bundle renders one tag per
    /// constituent file, separated by newlines.
    pub fn tag(
        &self,
        identifier: &str,
        options: ResolveOptions,
        attributes: &Attributes,
    ) -> Result<String, ResolveError> {
        let settings = &self.shared.settings;
        let normalized = resolve::normalize(identifier, &settings.plugins);

        let ext = extension(&normalized).unwrap_or_default();
        let Some(format) = settings.plugins.tag(ext) else {
            let err = ResolveError::NoTagFormatter(ext.to_string());
            return Err(self.failed(&normalized, err));
        };

        if settings.options.separate_bundles
            && let Some(include) = &options.include
        {
            let names = {
                let index = lock(&self.shared.index);
                resolve::expand(include, &index.assets)
            }
            .map_err(|err| self.failed(&normalized, err))?;

            let mut tags = Vec::with_capacity(names.len());
            for name in names {
                let single = ResolveOptions {
                    include: None,
                    ..options.clone()
                };
                tags.push(self.tag(&name, single, attributes)?);
            }

            return Ok(tags.join("\n"));
        }

        let url = self.url(&normalized, options)?;
        Ok(format(&url, &settings.options, attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Event;
    use crate::assets::tests::{fixture, root};

    #[test]
    fn test_default_formatters() {
        let mut attributes = Attributes::new();
        attributes.insert("defer".into(), "defer".into());

        assert_eq!(
            script("/a.js", &Options::default(), &attributes),
            "<script src=\"/a.js\" defer=\"defer\"></script>"
        );
        assert_eq!(
            stylesheet("/a.css", &Options::default(), &Attributes::new()),
            "<link rel=\"stylesheet\" href=\"/a.css\">"
        );
    }

    #[test]
    fn test_attributes_are_escaped() {
        let mut attributes = Attributes::new();
        attributes.insert("title".into(), "\"a\" & <b>".into());

        assert_eq!(
            render(&attributes),
            " title=\"&quot;a&quot; &amp; &lt;b&gt;\""
        );
    }

    #[test]
    fn test_tag_for_jquery() {
        let dir = fixture(&[("jquery.js", "window.jQuery = {};\n")]);
        let assets = Assets::config(root(&dir)).hash_length(6).finish().unwrap();

        let tag = assets
            .tag("jquery.js", ResolveOptions::new(), &Attributes::new())
            .unwrap();
        assert_eq!(tag, "<script src=\"/asset-82470a-jquery.js\"></script>");
    }

    #[test]
    fn test_tag_unknown_type() {
        let dir = fixture(&[("notes.txt", "hello")]);
        let assets = Assets::config(root(&dir)).finish().unwrap();
        let mut events = assets.subscribe();

        let err = assets
            .tag("notes.txt", ResolveOptions::new(), &Attributes::new())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unable to create an HTML tag for type \".txt\""
        );
        assert!(assets.pending("notes.txt").is_none());
        assert_eq!(events.try_recv().unwrap(), Event::Error(err.to_string()));
    }

    #[test]
    fn test_tag_bundle_errors_are_reported() {
        let dir = fixture(&[("a.js", "a")]);
        let assets = Assets::config(root(&dir))
            .separate_bundles(true)
            .finish()
            .unwrap();
        let mut events = assets.subscribe();

        let options = ResolveOptions::new().include(["["]);
        let err = assets.tag("all.js", options, &Attributes::new()).unwrap_err();
        assert!(matches!(err, ResolveError::Pattern(..)));
        assert_eq!(events.try_recv().unwrap(), Event::Error(err.to_string()));
    }

    #[test]
    fn test_tag_for_compiled_source() {
        let dir = fixture(&[("main.less", "a {}")]);
        let assets = Assets::config(root(&dir))
            .compiler("less", "css", |text, _| Ok(text.to_string()))
            .url_prefix("https://cdn.example.com")
            .finish()
            .unwrap();

        let tag = assets
            .tag("main.less", ResolveOptions::new(), &Attributes::new())
            .unwrap();
        let expected = "<link rel=\"stylesheet\" href=\"https://cdn.example.com/asset-";
        assert!(tag.starts_with(expected));
        assert!(tag.ends_with("-main.css\">"));
    }

    #[test]
    fn test_separate_bundles() {
        let dir = fixture(&[("a.js", "a"), ("b.js", "b")]);
        let assets = Assets::config(root(&dir))
            .hash_length(4)
            .separate_bundles(true)
            .finish()
            .unwrap();

        let options = ResolveOptions::new().include(["*.js"]);
        let tags = assets.tag("all.js", options, &Attributes::new()).unwrap();

        let lines: Vec<_> = tags.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("-a.js\""));
        assert!(lines[1].contains("-b.js\""));
        assert!(assets.pending("all.js").is_none());
    }

    #[test]
    fn test_custom_formatter() {
        let dir = fixture(&[("app.js", "a")]);
        let module = |url: &str, _: &Options, _: &Attributes| {
            format!("<script type=\"module\" src=\"{url}\"></script>")
        };
        let assets = Assets::config(root(&dir))
            .hash_length(4)
            .tag("js", module)
            .finish()
            .unwrap();

        let tag = assets
            .tag("app.js", ResolveOptions::new(), &Attributes::new())
            .unwrap();
        assert!(tag.starts_with("<script type=\"module\""));
    }
}
