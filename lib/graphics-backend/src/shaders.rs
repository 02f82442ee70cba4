//! Built-in GLSL source for the three fixed pipelines (spec.md §4.4-4.6). These
//! are compiled once during `renderer_init` via the external-compiler path
//! (shader toolchain is out of scope; this backend only ever needs bytecode
//! for these three shaders, so it carries its own source rather than
//! accepting arbitrary ones).

pub const UI_VERT: &str = r#"
#version 450

layout(location = 0) in vec4 in_dst;
layout(location = 1) in vec4 in_src;
layout(location = 2) in vec4 in_color_tl;
layout(location = 3) in vec4 in_color_tr;
layout(location = 4) in vec4 in_color_br;
layout(location = 5) in vec4 in_color_bl;
layout(location = 6) in vec4 in_corner_radii;
layout(location = 7) in vec4 in_extra;

layout(push_constant) uniform PushConstants {
    mat3 xform;
    vec2 viewport_size;
} pc;

layout(location = 0) out vec2 out_local_pos;
layout(location = 1) out vec2 out_uv;
layout(location = 2) out vec4 out_color;
layout(location = 3) out vec4 out_corner_radii;
layout(location = 4) out vec4 out_extra;
layout(location = 5) out vec2 out_half_size;

const vec2 CORNERS[4] = vec2[4](vec2(0.0, 0.0), vec2(1.0, 0.0), vec2(1.0, 1.0), vec2(0.0, 1.0));

void main() {
    vec2 corner = CORNERS[gl_VertexIndex % 4];
    vec2 dst_min = in_dst.xy;
    vec2 dst_max = in_dst.zw;
    vec2 size = dst_max - dst_min;
    vec2 local = corner * size;
    vec2 world = dst_min + local;

    vec3 xformed = pc.xform * vec3(world, 1.0);
    vec2 ndc = (xformed.xy / pc.viewport_size) * 2.0 - 1.0;
    gl_Position = vec4(ndc, 0.0, 1.0);

    out_local_pos = local - size * 0.5;
    out_half_size = size * 0.5;
    out_uv = mix(in_src.xy, in_src.zw, corner);

    vec4 colors[4] = vec4[4](in_color_tl, in_color_tr, in_color_br, in_color_bl);
    out_color = colors[gl_VertexIndex % 4];
    out_corner_radii = in_corner_radii;
    out_extra = in_extra;
}
"#;

pub const UI_FRAG: &str = r#"
#version 450

layout(location = 0) in vec2 in_local_pos;
layout(location = 1) in vec2 in_uv;
layout(location = 2) in vec4 in_color;
layout(location = 3) in vec4 in_corner_radii;
layout(location = 4) in vec4 in_extra;
layout(location = 5) in vec2 in_half_size;

layout(binding = 0) uniform sampler2D tex_sampler;
layout(binding = 1) uniform SwizzleBlock {
    mat4 swizzle;
    vec4 opacity_pad;
} swiz;

layout(location = 0) out vec4 frag_color;

float rounded_rect_sdf(vec2 p, vec2 half_size, float radius) {
    vec2 q = abs(p) - half_size + radius;
    return length(max(q, 0.0)) + min(max(q.x, q.y), 0.0) - radius;
}

void main() {
    float border_thickness = in_extra.x;
    float edge_softness = max(in_extra.y, 0.0001);
    bool white_override = in_extra.z != 0.0;
    bool is_font_texture = in_extra.w != 0.0;

    float radius = in_corner_radii.x;
    float outer = rounded_rect_sdf(in_local_pos, in_half_size, radius);
    float alpha = 1.0 - smoothstep(0.0, 2.0 * edge_softness, outer);

    if (border_thickness > 0.0) {
        float inner = rounded_rect_sdf(in_local_pos, in_half_size - border_thickness, max(radius - border_thickness, 0.0));
        float inner_alpha = smoothstep(0.0, 2.0 * edge_softness, inner);
        alpha *= inner_alpha;
    }

    vec4 sampled = white_override ? vec4(1.0) : (swiz.swizzle * texture(tex_sampler, in_uv));
    vec4 linear_sample = vec4(pow(sampled.rgb, vec3(2.2)), sampled.a);

    frag_color = in_color * linear_sample;
    frag_color.a *= alpha * swiz.opacity_pad.x;
}
"#;

pub const BLUR_VERT: &str = r#"
#version 450

layout(location = 0) out vec2 out_uv;

const vec2 POSITIONS[3] = vec2[3](vec2(-1.0, -1.0), vec2(3.0, -1.0), vec2(-1.0, 3.0));

void main() {
    vec2 pos = POSITIONS[gl_VertexIndex];
    gl_Position = vec4(pos, 0.0, 1.0);
    out_uv = pos * 0.5 + 0.5;
}
"#;

pub const BLUR_FRAG: &str = r#"
#version 450

layout(location = 0) in vec2 in_uv;
layout(binding = 0) uniform sampler2D source_color;
layout(push_constant) uniform PushConstants {
    vec2 texel_size;
    float radius;
} pc;

layout(location = 0) out vec4 frag_color;

void main() {
    vec4 sum = vec4(0.0);
    float total_weight = 0.0;
    int samples = int(clamp(pc.radius, 1.0, 16.0));
    for (int i = -samples; i <= samples; i++) {
        float weight = 1.0 - abs(float(i)) / float(samples + 1);
        sum += texture(source_color, in_uv + vec2(float(i), 0.0) * pc.texel_size) * weight;
        total_weight += weight;
    }
    frag_color = sum / max(total_weight, 0.0001);
}
"#;

pub const MESH3D_VERT: &str = r#"
#version 450

layout(location = 0) in vec3 in_position;
layout(location = 1) in vec2 in_texcoord;
layout(location = 2) in vec3 in_normal;
layout(location = 3) in vec4 in_color;

layout(location = 4) in mat4 in_model;

layout(binding = 0) uniform Camera {
    mat4 view_proj;
} cam;

layout(location = 0) out vec2 out_uv;
layout(location = 1) out vec3 out_normal;
layout(location = 2) out vec4 out_color;
layout(location = 3) out vec3 out_world_pos;

void main() {
    vec4 world_pos = in_model * vec4(in_position, 1.0);
    gl_Position = cam.view_proj * world_pos;
    out_world_pos = world_pos.xyz;
    out_normal = mat3(in_model) * in_normal;
    out_uv = in_texcoord;
    out_color = in_color;
}
"#;

pub const MESH3D_FRAG: &str = r#"
#version 450

layout(location = 0) in vec2 in_uv;
layout(location = 1) in vec3 in_normal;
layout(location = 2) in vec4 in_color;
layout(location = 3) in vec3 in_world_pos;

layout(set = 1, binding = 0) uniform sampler2D albedo_tex;
layout(set = 1, binding = 1) uniform SwizzleBlock {
    mat4 swizzle;
    vec4 opacity_pad;
} swiz;

layout(location = 0) out vec4 frag_color;

void main() {
    vec3 n = normalize(in_normal);
    vec3 l = normalize(vec3(0.5, 1.0, 0.3));
    float diffuse = max(dot(n, l), 0.0);
    float lighting = 0.3 + 0.7 * diffuse;

    vec4 albedo = swiz.swizzle * texture(albedo_tex, in_uv);
    frag_color = vec4(albedo.rgb * in_color.rgb * lighting, albedo.a * in_color.a);
}
"#;
