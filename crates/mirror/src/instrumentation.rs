//! In-page scripts injected into every surface
//!
//! The bootstrap script intercepts scroll and click gestures and forwards them
//! to the host through a page binding, and applies host messages (mirrored
//! scrolls, clicks, picking mode) to the page. It is safe to inject more than
//! once per document.

use serde_json::Value;

use crate::device::DeviceId;

/// Name of the page binding the instrumentation reports through
pub const HOST_BINDING: &str = "__responsiveMirrorHost";

/// Rewrites every stylesheet link's cache-busting parameter to the current time
pub const RELOAD_CSS_SCRIPT: &str = r#"(() => {
  document.querySelectorAll('link[rel=stylesheet][href]').forEach((element) => {
    let href = element.href;
    if (!href) {
      return;
    }
    href = href.replace(/[?&]invalidateCacheParam=([^&$]*)/, '');
    element.href = href + (href.indexOf('?') >= 0 ? '&' : '?') + 'invalidateCacheParam=' + Date.now();
  });
})()"#;

const BOOTSTRAP: &str = r#"(() => {
  const binding = __BINDING__;
  const existing = window.responsiveMirror;
  if (existing) {
    existing.deviceId = __DEVICE_ID__;
    return true;
  }

  const app = {
    deviceId: __DEVICE_ID__,
    mirroring: true,
    mouseOn: false,
    inspectorArmed: false,
    lastClickElement: null,
    highlighted: null,
  };

  app.sendMessageToHost = (type, payload) => {
    const transport = window[binding];
    if (typeof transport !== 'function') {
      return;
    }
    transport(JSON.stringify({ type, payload: payload === undefined ? null : payload }));
  };

  app.cssPath = (element) => {
    const path = [];
    while (element && element.nodeType === Node.ELEMENT_NODE) {
      let selector = element.nodeName.toLowerCase();
      if (element.id) {
        path.unshift(selector + '#' + CSS.escape(element.id));
        break;
      }
      let sibling = element;
      let nth = 1;
      while ((sibling = sibling.previousElementSibling)) {
        if (sibling.nodeName === element.nodeName) {
          nth++;
        }
      }
      if (nth !== 1) {
        selector += ':nth-of-type(' + nth + ')';
      }
      path.unshift(selector);
      element = element.parentNode;
    }
    return path.join(' > ');
  };

  const unhighlight = () => {
    if (app.highlighted) {
      app.highlighted.style.outline = app.highlighted.dataset.mirrorOutline || '';
      delete app.highlighted.dataset.mirrorOutline;
      app.highlighted = null;
    }
  };

  app.setInspectorArmed = (armed) => {
    app.inspectorArmed = armed;
    if (!armed) {
      unhighlight();
    }
  };

  app.receive = (channel, payload) => {
    switch (channel) {
      case 'scrollMessage':
        window.scrollTo(payload.x, payload.y);
        break;
      case 'clickMessage': {
        const target = document.querySelector(payload.cssPath);
        if (target) {
          app.lastClickElement = target;
          target.click();
        }
        break;
      }
      case 'scrollUpMessage':
        window.scrollTo({ top: 0, left: 0, behavior: 'smooth' });
        break;
      case 'scrollDownMessage':
        window.scrollTo({ top: document.body.scrollHeight, left: 0, behavior: 'smooth' });
        break;
      case 'enableInspectorMessage':
        app.setInspectorArmed(true);
        break;
      case 'disableInspectorMessage':
        app.setInspectorArmed(false);
        break;
      case 'eventsMirroringState':
        app.mirroring = !!payload;
        document.documentElement.style.cursor = app.mirroring ? '' : 'not-allowed';
        break;
      default:
        break;
    }
  };

  document.addEventListener('mouseover', (e) => {
    if (!app.inspectorArmed || !(e.target instanceof HTMLElement)) {
      return;
    }
    unhighlight();
    e.target.dataset.mirrorOutline = e.target.style.outline;
    e.target.style.outline = '2px solid rgba(111, 168, 220, 0.9)';
    app.highlighted = e.target;
  });
  document.addEventListener('mouseleave', () => {
    app.mouseOn = false;
    unhighlight();
  });
  document.addEventListener('mouseenter', () => {
    app.mouseOn = true;
  });

  window.addEventListener('scroll', () => {
    if (!app.mouseOn || !app.mirroring) {
      return;
    }
    app.sendMessageToHost('scroll', { position: { x: window.scrollX, y: window.scrollY } });
  });

  document.addEventListener('click', (e) => {
    if (e.target === app.lastClickElement || e.mirrorProcessed) {
      app.lastClickElement = null;
      e.mirrorProcessed = true;
      return;
    }
    if (app.inspectorArmed) {
      e.preventDefault();
      e.stopPropagation();
      app.setInspectorArmed(false);
      const rect = e.target.getBoundingClientRect();
      app.sendMessageToHost('open-inspector-at', { x: rect.left, y: rect.top });
      return;
    }
    e.mirrorProcessed = true;
    if (app.mirroring) {
      app.sendMessageToHost('click', { cssPath: app.cssPath(e.target) });
    }
  }, true);

  window.responsiveMirror = app;
  return true;
})()"#;

/// Instrumentation for one device's surface
pub fn bootstrap_script(device_id: &DeviceId) -> String {
    BOOTSTRAP
        .replace("__BINDING__", &js_string(HOST_BINDING))
        .replace("__DEVICE_ID__", &js_string(device_id.as_str()))
}

/// Deliver a host message to the instrumentation, for surfaces that only
/// offer script evaluation
pub fn dispatch_script(channel: &str, payload: &Value) -> String {
    format!(
        "window.responsiveMirror && window.responsiveMirror.receive({}, {})",
        js_string(channel),
        payload
    )
}

fn js_string(raw: &str) -> String {
    Value::String(raw.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bootstrap_embeds_escaped_device_id() {
        let script = bootstrap_script(&DeviceId::from("pixel \"2\""));
        assert!(script.contains(r#"deviceId: "pixel \"2\"""#));
        assert!(script.contains(r#"const binding = "__responsiveMirrorHost";"#));
        assert!(!script.contains("__DEVICE_ID__"));
    }

    #[test]
    fn test_dispatch_script() {
        let script = dispatch_script("scrollMessage", &json!({ "x": 0.0, "y": 120.0 }));
        assert_eq!(
            script,
            r#"window.responsiveMirror && window.responsiveMirror.receive("scrollMessage", {"x":0.0,"y":120.0})"#
        );
    }

    #[test]
    fn test_css_reload_uses_cache_param() {
        assert!(RELOAD_CSS_SCRIPT.contains("invalidateCacheParam="));
    }
}
