//! Service catalog model

use serde::{Deserialize, Serialize};

/// Resource envelope advertised for a service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResources {
    pub cpu: u32,
    pub memory: String,
    pub storage: String,
}

/// A bookable service type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Stable identifier, referenced by bookings
    pub id: String,

    /// Display name
    pub name: String,

    /// Short description for the catalog listing
    pub description: String,

    /// Monthly price in EUR
    pub price: f64,

    /// Primary container image
    pub image: String,

    /// Advertised resource envelope
    pub resources: ServiceResources,

    /// Compose manifest template with `{{TOKEN}}` placeholders
    pub compose_template: String,

    /// Whether bookings must carry license credentials
    pub requires_license: bool,

    /// Reverse-proxy config template rendered to a per-booking host
    /// directory before deployment, for services that need one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_conf_template: Option<String>,
}

const FE2_COMPOSE_TEMPLATE: &str = r#"version: '3'
services:
  fe2_database:
    image: mongo:4.4.29
    ports:
      - 27017
    volumes:
      - fe2_db_data:/data/db
    restart: unless-stopped

  fe2_app:
    image: alamosgmbh/fe2:2.36.100
    environment:
      - FE2_EMAIL={{FE2_EMAIL}}
      - FE2_PASSWORD={{FE2_PASSWORD}}
      - FE2_ACTIVATION_NAME=fe2_{{UNIQUE_ID}}
      - FE2_IP_MONGODB=fe2_database
      - FE2_PORT_MONGODB=27017
    ports:
      - 83
    volumes:
      - fe2_logs:/Logs
      - fe2_config:/Config
    restart: unless-stopped
    depends_on:
      - fe2_database

  fe2_nginx:
    image: nginx:alpine
    ports:
      - "{{PORT}}:80"
    environment:
      - NGINX_HOST=localhost
    command: sh -c "echo 'server { listen 80; location / { proxy_pass http://fe2_app:83; } }' > /etc/nginx/conf.d/default.conf && nginx -g 'daemon off;'"
    restart: unless-stopped
    depends_on:
      - fe2_app

volumes:
  fe2_db_data:
  fe2_logs:
  fe2_config:
"#;

const FE2_NGINX_TEMPLATE: &str = r#"server {
    listen 80;
    server_name {{DOMAIN}};

    access_log /var/log/nginx/fe2_{{UNIQUE_ID}}.access.log;
    error_log /var/log/nginx/fe2_{{UNIQUE_ID}}.error.log;

    location / {
        proxy_pass http://fe2_app:83;
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
    }
}
"#;

/// Catalog entries seeded when no services file exists yet
pub fn default_catalog() -> Vec<ServiceDefinition> {
    vec![ServiceDefinition {
        id: "fe2-docker".to_string(),
        name: "FE2 - Feuerwehr Einsatzleitsystem".to_string(),
        description: "Alamos FE2 - Professionelles Einsatzleitsystem für Feuerwehren"
            .to_string(),
        price: 19.99,
        image: "alamosgmbh/fe2:latest".to_string(),
        resources: ServiceResources {
            cpu: 2,
            memory: "2GB".to_string(),
            storage: "10GB".to_string(),
        },
        compose_template: FE2_COMPOSE_TEMPLATE.to_string(),
        requires_license: true,
        proxy_conf_template: Some(FE2_NGINX_TEMPLATE.to_string()),
    }]
}
