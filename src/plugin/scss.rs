use crate::Options;

/// Compiles SCSS to CSS with `grass`.
///
/// Output is compressed when [`Options::compress`] is set. Register it with
/// `config.compiler("scss", "css", fingerprint::plugin::sass)`.
pub fn sass(source: &str, options: &Options) -> anyhow::Result<String> {
    let style = if options.compress {
        grass::OutputStyle::Compressed
    } else {
        grass::OutputStyle::Expanded
    };

    let opts = grass::Options::default().style(style);

    grass::from_string(source.to_owned(), &opts).map_err(|err| anyhow::anyhow!("{err}"))
}
