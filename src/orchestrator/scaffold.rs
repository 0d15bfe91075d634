//! The fixed React + Vite + Tailwind template written into every new sandbox.

use serde::{Serialize, Serializer};

use crate::error::Result;

/// A file of the template, relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldFile {
    pub path: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: &'static str,
    pub version: &'static str,
    #[serde(rename = "type")]
    pub module_type: &'static str,
    #[serde(serialize_with = "ordered_map")]
    pub scripts: Vec<(&'static str, &'static str)>,
    #[serde(serialize_with = "ordered_map")]
    pub dependencies: Vec<(&'static str, &'static str)>,
    #[serde(serialize_with = "ordered_map")]
    pub dev_dependencies: Vec<(&'static str, &'static str)>,
}

/// Writes pairs as a JSON object, keeping insertion order.
fn ordered_map<S: Serializer>(
    pairs: &[(&'static str, &'static str)],
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.collect_map(pairs.iter().copied())
}

impl Default for PackageManifest {
    fn default() -> Self {
        Self {
            name: "sandbox-app",
            version: "1.0.0",
            module_type: "module",
            scripts: vec![
                ("dev", "vite --host"),
                ("build", "vite build"),
                ("preview", "vite preview"),
            ],
            dependencies: vec![("react", "^18.2.0"), ("react-dom", "^18.2.0")],
            dev_dependencies: vec![
                ("@vitejs/plugin-react", "^4.0.0"),
                ("vite", "^4.3.9"),
                ("tailwindcss", "^3.3.0"),
                ("postcss", "^8.4.31"),
                ("autoprefixer", "^10.4.16"),
            ],
        }
    }
}

impl PackageManifest {
    /// Pretty-printed with two-space indentation, like `npm init` writes it.
    pub fn render(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub const PACKAGE_JSON: &str = "package.json";

/// Every path the template creates, in the order it is written.
pub const SCAFFOLD_PATHS: [&str; 8] = [
    PACKAGE_JSON,
    "vite.config.js",
    "tailwind.config.js",
    "postcss.config.js",
    "index.html",
    "src/main.jsx",
    "src/App.jsx",
    "src/index.css",
];

/// The package manifest file.
pub fn manifest_file() -> Result<ScaffoldFile> {
    Ok(ScaffoldFile {
        path: PACKAGE_JSON,
        content: PackageManifest::default().render()?,
    })
}

/// All template files except the manifest. `port` is baked into the Vite
/// config so the dev server binds where the orchestrator expects it.
pub fn project_files(port: u16) -> Vec<ScaffoldFile> {
    vec![
        ScaffoldFile {
            path: "vite.config.js",
            content: vite_config(port),
        },
        ScaffoldFile {
            path: "tailwind.config.js",
            content: TAILWIND_CONFIG.to_string(),
        },
        ScaffoldFile {
            path: "postcss.config.js",
            content: POSTCSS_CONFIG.to_string(),
        },
        ScaffoldFile {
            path: "index.html",
            content: INDEX_HTML.to_string(),
        },
        ScaffoldFile {
            path: "src/main.jsx",
            content: MAIN_JSX.to_string(),
        },
        ScaffoldFile {
            path: "src/App.jsx",
            content: APP_JSX.to_string(),
        },
        ScaffoldFile {
            path: "src/index.css",
            content: INDEX_CSS.to_string(),
        },
    ]
}

fn vite_config(port: u16) -> String {
    format!(
        r#"import {{ defineConfig }} from 'vite'
import react from '@vitejs/plugin-react'

export default defineConfig({{
  plugins: [react()],
  server: {{
    host: '0.0.0.0',
    port: {port},
    strictPort: true,
    hmr: false
  }}
}})"#
    )
}

const TAILWIND_CONFIG: &str = r#"/** @type {import('tailwindcss').Config} */
export default {
  content: [
    "./index.html",
    "./src/**/*.{js,ts,jsx,tsx}",
  ],
  theme: {
    extend: {},
  },
  plugins: [],
}"#;

const POSTCSS_CONFIG: &str = r#"export default {
  plugins: {
    tailwindcss: {},
    autoprefixer: {},
  },
}"#;

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
  <head>
    <meta charset="UTF-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1.0" />
    <title>Sandbox App</title>
  </head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.jsx"></script>
  </body>
</html>"#;

const MAIN_JSX: &str = r#"import React from 'react'
import ReactDOM from 'react-dom/client'
import App from './App.jsx'
import './index.css'

ReactDOM.createRoot(document.getElementById('root')).render(
  <React.StrictMode>
    <App />
  </React.StrictMode>,
)"#;

const APP_JSX: &str = r#"function App() {
  return (
    <div className="min-h-screen bg-gray-900 text-white flex items-center justify-center p-4">
      <div className="text-center max-w-2xl">
        <p className="text-lg text-gray-400">
          Sandbox Ready<br/>
          Start building your React app with Vite and Tailwind CSS!
        </p>
      </div>
    </div>
  )
}

export default App"#;

const INDEX_CSS: &str = r#"@tailwind base;
@tailwind components;
@tailwind utilities;

@layer base {
  :root {
    font-synthesis: none;
    text-rendering: optimizeLegibility;
    -webkit-font-smoothing: antialiased;
    -moz-osx-font-smoothing: grayscale;
    -webkit-text-size-adjust: 100%;
  }

  * {
    margin: 0;
    padding: 0;
    box-sizing: border-box;
  }
}

body {
  font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Oxygen, Ubuntu, sans-serif;
  background-color: rgb(17 24 39);
}"#;
