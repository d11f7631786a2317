//! letterforge – command-line template → PDF renderer.
//!
//! Usage:
//!   letterforge <template> [--data data.json] [--templates DIR] [--out out.pdf] ...
//!
//! If `--out` is omitted the PDF is written to the current directory, named
//! after the template (e.g. `letters/welcome` → `welcome.pdf`).

use std::{
    env, fs,
    path::{Path, PathBuf},
    process,
};

use letterforge::{
    FontResource, OutboxGateway, PageOrientation, Pipeline, PipelineConfig, TemplateContext,
};

#[derive(Debug, Default)]
struct CliArgs {
    template: Option<String>,
    data: Option<PathBuf>,
    templates: Option<PathBuf>,
    suffix: Option<String>,
    resources: Option<String>,
    fonts: Vec<FontResource>,
    out: Option<PathBuf>,
    xhtml: Option<PathBuf>,
    layout_json: Option<PathBuf>,
    config: Option<PathBuf>,
    outbox: Option<PathBuf>,
    title: Option<String>,
    landscape: bool,
    html_body: bool,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("letterforge");

    let cli = match parse_args(args.get(1..).unwrap_or_default()) {
        Ok(Some(cli)) => cli,
        Ok(None) => {
            print_usage(prog);
            process::exit(0);
        }
        Err(msg) => {
            eprintln!("Error: {msg}");
            print_usage(prog);
            process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// `Ok(None)` means `--help` was given.
fn parse_args(args: &[String]) -> Result<Option<CliArgs>, String> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--data" | "-d" => cli.data = Some(value(arg.as_str())?.into()),
            "--templates" => cli.templates = Some(value(arg.as_str())?.into()),
            "--suffix" => cli.suffix = Some(value(arg.as_str())?),
            "--resources" => cli.resources = Some(value(arg.as_str())?),
            "--font" | "-f" => cli.fonts.push(parse_font(&value(arg.as_str())?)),
            "--out" | "-o" => cli.out = Some(value(arg.as_str())?.into()),
            "--xhtml" => cli.xhtml = Some(value(arg.as_str())?.into()),
            "--layout-json" => cli.layout_json = Some(value(arg.as_str())?.into()),
            "--config" | "-c" => cli.config = Some(value(arg.as_str())?.into()),
            "--outbox" => cli.outbox = Some(value(arg.as_str())?.into()),
            "--title" | "-t" => cli.title = Some(value(arg.as_str())?),
            "--landscape" | "-l" => cli.landscape = true,
            "--html-body" => cli.html_body = true,
            "--help" | "-h" => return Ok(None),
            other if other.starts_with('-') => return Err(format!("unknown flag: {other}")),
            name => {
                if cli.template.is_some() {
                    return Err(format!("unexpected argument: {name}"));
                }
                cli.template = Some(name.to_string());
            }
        }
    }
    if cli.template.is_none() {
        return Err("no template specified".to_string());
    }
    Ok(Some(cli))
}

/// `PATH`, `PATH:embed` (Identity-H, embedded) or `PATH:winansi`.
fn parse_font(arg: &str) -> FontResource {
    match arg.rsplit_once(':') {
        Some((path, "embed")) => FontResource::identity_h(path),
        Some((path, "winansi")) => FontResource::win_ansi(path),
        _ => FontResource::identity_h(arg),
    }
}

fn run(cli: CliArgs) -> letterforge::Result<()> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = cli.templates {
        config.templates.dir = dir;
    }
    if let Some(suffix) = cli.suffix {
        config.templates.suffix = suffix;
    }
    if let Some(base) = cli.resources {
        config.resource_base = Some(base);
    }
    if let Some(title) = cli.title {
        config.title = title;
    }
    if cli.landscape {
        config.orientation = PageOrientation::Landscape;
    }

    let template = cli.template.unwrap_or_default();
    let context = match &cli.data {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| letterforge::Error::Io {
                path: path.clone(),
                source: e,
            })?;
            TemplateContext::from_json_str(&json)?
        }
        None => TemplateContext::new(),
    };

    let pipeline = Pipeline::new(config);
    let markup = pipeline.prepare(&template, &context)?;
    if let Some(path) = &cli.xhtml {
        write_file(path, &markup.to_bytes())?;
    }

    let (document, layout) = pipeline.render_normalized(&markup, &cli.fonts)?;
    if let Some(path) = &cli.layout_json {
        write_file(path, layout.to_json()?.as_bytes())?;
    }

    let output = cli.out.unwrap_or_else(|| {
        let stem = template.rsplit('/').next().unwrap_or("output");
        PathBuf::from(format!("{stem}.pdf"))
    });
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| letterforge::Error::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    document.write_to(&output)?;
    let pages = document.page_count();
    eprintln!(
        "Wrote '{}' ({} bytes, {} page{})",
        output.display(),
        document.bytes().len(),
        pages,
        if pages == 1 { "" } else { "s" }
    );

    if let Some(dir) = cli.outbox {
        let attachment_name = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let subject = document.title().to_string();
        let (body, body_mime) = if cli.html_body {
            (markup.as_str().to_string(), Some("text/html"))
        } else {
            (format!("Please find {attachment_name} attached."), None)
        };
        let envelope = pipeline.compose(
            document,
            &attachment_name,
            Vec::new(),
            subject,
            body,
            body_mime,
        )?;
        let gateway = OutboxGateway::new(dir);
        let stored = gateway.store(&envelope)?;
        eprintln!("Queued message in '{}'", stored.display());
    }
    Ok(())
}

fn write_file(path: &Path, bytes: &[u8]) -> letterforge::Result<()> {
    fs::write(path, bytes).map_err(|e| letterforge::Error::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn print_usage(prog: &str) {
    eprintln!("letterforge – template to PDF renderer");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  {prog} <template> [flags]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <template>          Template name, relative to the template root, without suffix");
    eprintln!();
    eprintln!("Flags:");
    eprintln!("  --data, -d FILE     JSON object bound as the template context");
    eprintln!("  --templates DIR     Template root directory (default: templates)");
    eprintln!("  --suffix SUFFIX     Template filename suffix (default: .html)");
    eprintln!("  --resources DIR     Base for stylesheets, images and fonts (default: template root)");
    eprintln!("  --font, -f FONT     PATH[:embed|:winansi]; may be repeated");
    eprintln!("  --out, -o FILE      Output PDF (default: <template>.pdf)");
    eprintln!("  --xhtml FILE        Also write the normalized XHTML");
    eprintln!("  --layout-json FILE  Also write the page layout as JSON");
    eprintln!("  --config, -c FILE   Pipeline configuration JSON");
    eprintln!("  --outbox DIR        Queue a message with the PDF attached, using the configured mail settings");
    eprintln!("  --title, -t TITLE   Document title used when the template has none");
    eprintln!("  --landscape, -l     Landscape page orientation");
    eprintln!("  --html-body         With --outbox, send the normalized XHTML as a text/html body");
    eprintln!("  --help, -h          Print this message");
}
